//! Keyword heuristics behind notification scoring and the chat assistant.
//!
//! Sentiment, categorization, and priority are all fixed-table scoring
//! passes over the message text. The chat side lives in [`chatbot`].

pub mod chatbot;

use chrono::{DateTime, Duration, Timelike, Utc};
use lazy_static::lazy_static;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::AssistantConfig;
use crate::db::Notification;

lazy_static! {
    static ref POSITIVE_WORDS: Vec<&'static str> = vec![
        "good", "great", "excellent", "amazing", "wonderful", "fantastic", "happy", "love",
        "like",
    ];
    static ref NEGATIVE_WORDS: Vec<&'static str> = vec![
        "bad", "terrible", "awful", "horrible", "hate", "dislike", "angry", "sad",
        "disappointed",
    ];
    static ref URGENT_KEYWORDS: Vec<&'static str> =
        vec!["urgent", "critical", "emergency", "immediately", "asap"];
    static ref CATEGORY_KEYWORDS: Vec<(&'static str, Vec<&'static str>)> = vec![
        (
            "attendance",
            vec!["attendance", "check-in", "check-out", "present", "absent", "late"],
        ),
        (
            "meeting",
            vec!["meeting", "conference", "call", "discussion", "agenda"],
        ),
        (
            "reminder",
            vec!["reminder", "don't forget", "remember", "deadline", "due"],
        ),
        (
            "alert",
            vec!["alert", "urgent", "important", "critical", "emergency"],
        ),
        (
            "announcement",
            vec!["announcement", "news", "update", "notice", "information"],
        ),
        (
            "system",
            vec!["system", "maintenance", "update", "upgrade", "technical"],
        ),
    ];
    static ref STOP_WORDS: Vec<&'static str> = vec![
        "the", "and", "for", "are", "was", "has", "have", "this", "that", "with", "from", "your",
        "you", "will", "been", "were", "their", "there", "about", "would", "could", "should",
        "them", "than", "then", "into", "over", "very",
    ];
}

/// Category base priorities; adjustments never push outside 1..=5.
fn category_base_priority(category: &str) -> i64 {
    match category {
        "alert" => 5,
        "system" => 4,
        "meeting" => 3,
        "attendance" | "reminder" => 2,
        _ => 1,
    }
}

/// Preferred delivery hours per notification type.
fn optimal_hours(notification_type: &str) -> &'static [u32] {
    match notification_type {
        "attendance" => &[9, 13, 17],
        "meeting" => &[9, 14, 16],
        "reminder" => &[10, 15],
        "alert" => &[0],
        "announcement" => &[9, 12, 17],
        "system" => &[8, 20],
        _ => &[9, 13, 17],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Negative => write!(f, "negative"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentAnalysis {
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub positive_ratio: f64,
    pub negative_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Categorization {
    pub category: String,
    pub confidence: f64,
    pub scores: HashMap<String, usize>,
}

/// Output of smart notification generation.
#[derive(Debug, Clone, Serialize)]
pub struct SmartNotification {
    pub title: String,
    pub message: String,
    pub category: String,
    pub priority: i64,
    pub sentiment: Sentiment,
    pub sentiment_confidence: f64,
    pub keywords: Vec<String>,
    pub suggested_time: String,
}

/// Summary of stored notification patterns.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatternSummary {
    pub total_notifications: usize,
    pub hour_distribution: HashMap<u32, usize>,
    pub category_distribution: HashMap<String, usize>,
    pub average_sentiment: f64,
    pub peak_hour: Option<u32>,
    pub most_common_category: Option<String>,
}

pub struct Assistant {
    pub(crate) config: AssistantConfig,
    pub(crate) http: reqwest::Client,
}

impl Assistant {
    pub fn new(config: AssistantConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Keyword sentiment scoring. Ratios are hit-count over word count, so
    /// confidence stays low for long messages with a single loaded word.
    pub fn analyze_sentiment(&self, text: &str) -> SentimentAnalysis {
        let text_lower = text.to_lowercase();
        let total_words = text.split_whitespace().count();

        if total_words == 0 {
            return SentimentAnalysis {
                sentiment: Sentiment::Neutral,
                confidence: 0.5,
                positive_ratio: 0.0,
                negative_ratio: 0.0,
            };
        }

        let positive_count = POSITIVE_WORDS
            .iter()
            .filter(|w| text_lower.contains(*w))
            .count();
        let negative_count = NEGATIVE_WORDS
            .iter()
            .filter(|w| text_lower.contains(*w))
            .count();

        let positive_ratio = positive_count as f64 / total_words as f64;
        let negative_ratio = negative_count as f64 / total_words as f64;

        let (sentiment, confidence) = if positive_ratio > negative_ratio {
            (Sentiment::Positive, (positive_ratio * 2.0).min(1.0))
        } else if negative_ratio > positive_ratio {
            (Sentiment::Negative, (negative_ratio * 2.0).min(1.0))
        } else {
            (Sentiment::Neutral, 0.5)
        };

        SentimentAnalysis {
            sentiment,
            confidence,
            positive_ratio,
            negative_ratio,
        }
    }

    /// Pick the category with the most keyword hits in title + message.
    /// Ties, including the zero-hit case, resolve to the earliest table
    /// entry.
    pub fn categorize(&self, title: &str, message: &str) -> Categorization {
        let full_text = format!("{} {}", title, message).to_lowercase();
        let word_count = full_text.split_whitespace().count().max(1);

        let mut scores = HashMap::new();
        let mut best: (&str, usize) = (CATEGORY_KEYWORDS[0].0, 0);

        for (category, keywords) in CATEGORY_KEYWORDS.iter() {
            let score = keywords.iter().filter(|k| full_text.contains(*k)).count();
            scores.insert(category.to_string(), score);
            if score > best.1 {
                best = (category, score);
            }
        }

        Categorization {
            category: best.0.to_string(),
            confidence: (best.1 as f64 / word_count as f64).min(1.0),
            scores,
        }
    }

    /// Notification priority, 1-5 where 5 is highest.
    ///
    /// Category sets the base, sentiment nudges it one step, and an urgent
    /// keyword in the text bumps it two steps. Always clamped to 1..=5.
    pub fn calculate_priority(
        &self,
        title: &str,
        message: &str,
        category: &str,
        sentiment: Sentiment,
    ) -> i64 {
        let mut priority = category_base_priority(category).max(1);

        match sentiment {
            Sentiment::Negative => priority += 1,
            Sentiment::Positive => priority = (priority - 1).max(1),
            Sentiment::Neutral => {}
        }

        let text_lower = format!("{} {}", title, message).to_lowercase();
        if URGENT_KEYWORDS.iter().any(|k| text_lower.contains(*k)) {
            priority = (priority + 2).min(5);
        }

        priority.clamp(1, 5)
    }

    /// Top keywords by frequency, stop words and short tokens excluded.
    pub fn extract_keywords(&self, text: &str, max_keywords: usize) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();

        for token in text.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if token.len() < 3 || STOP_WORDS.contains(&token) {
                continue;
            }
            *counts.entry(token.to_string()).or_default() += 1;
        }

        let mut keywords: Vec<(String, usize)> = counts.into_iter().collect();
        // Frequency first, then alphabetical so results are stable.
        keywords.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        keywords.truncate(max_keywords);
        keywords.into_iter().map(|(word, _)| word).collect()
    }

    /// Next optimal delivery time at or after `now`.
    ///
    /// User-preferred times ("HH:MM,HH:MM") override the per-type table.
    /// Candidates are tried in their configured order and the first one
    /// still ahead of `now` today wins; once every candidate today has
    /// passed, the earliest candidate hour tomorrow wins.
    pub fn suggest_optimal_time(
        &self,
        notification_type: &str,
        preferred_times: Option<&str>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let hours: Vec<u32> = preferred_times
            .map(|times| {
                times
                    .split(',')
                    .filter_map(|t| t.trim().split(':').next()?.parse().ok())
                    .filter(|h| *h < 24)
                    .collect()
            })
            .filter(|parsed: &Vec<u32>| !parsed.is_empty())
            .unwrap_or_else(|| optimal_hours(notification_type).to_vec());

        for hour in &hours {
            if *hour > now.hour() {
                if let Some(t) = now
                    .with_hour(*hour)
                    .and_then(|t| t.with_minute(0))
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                {
                    return t;
                }
            }
        }

        let earliest = hours.into_iter().min().unwrap_or(9);
        let tomorrow = now + Duration::days(1);
        tomorrow
            .with_hour(earliest)
            .and_then(|t| t.with_minute(0))
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or_else(|| now + Duration::minutes(5))
    }

    /// Compose a notification from free-form context: canned title/message
    /// per type, then category, priority, and a suggested send time.
    pub fn generate_smart_notification(
        &self,
        context: &str,
        notification_type: &str,
        now: DateTime<Utc>,
    ) -> SmartNotification {
        let sentiment = self.analyze_sentiment(context);
        let keywords = self.extract_keywords(context, 10);
        let top_keywords = keywords
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");

        let (title, message) = match notification_type {
            "attendance" => {
                if sentiment.sentiment == Sentiment::Positive {
                    (
                        "Attendance Update".to_string(),
                        format!(
                            "Attendance has been recorded successfully. Keywords: {}",
                            top_keywords
                        ),
                    )
                } else {
                    (
                        "Attendance Alert".to_string(),
                        format!("Please check attendance records. Keywords: {}", top_keywords),
                    )
                }
            }
            "meeting" => (
                "Meeting Reminder".to_string(),
                format!("Upcoming meeting reminder. Context: {}", truncate(context, 100)),
            ),
            "system" => (
                "System Notification".to_string(),
                format!("System update: {}", truncate(context, 100)),
            ),
            _ => (
                "Smart Notification".to_string(),
                format!("Generated from: {}", truncate(context, 100)),
            ),
        };

        let categorization = self.categorize(&title, &message);
        let priority =
            self.calculate_priority(&title, &message, &categorization.category, sentiment.sentiment);
        let suggested_time = self.suggest_optimal_time(&categorization.category, None, now);

        SmartNotification {
            title,
            message: truncate(&message, self.config.max_message_length).to_string(),
            category: categorization.category,
            priority,
            sentiment: sentiment.sentiment,
            sentiment_confidence: sentiment.confidence,
            keywords,
            suggested_time: suggested_time.to_rfc3339(),
        }
    }

    /// Hour/category/sentiment summary over stored notifications.
    pub fn analyze_patterns(&self, notifications: &[Notification]) -> PatternSummary {
        if notifications.is_empty() {
            return PatternSummary::default();
        }

        let mut hour_distribution: HashMap<u32, usize> = HashMap::new();
        let mut category_distribution: HashMap<String, usize> = HashMap::new();
        let mut sentiment_sum = 0.0;
        let mut sentiment_count = 0usize;

        for n in notifications {
            if let Ok(created) = DateTime::parse_from_rfc3339(&n.created_at) {
                *hour_distribution.entry(created.hour()).or_default() += 1;
            }
            *category_distribution
                .entry(n.notification_type.clone())
                .or_default() += 1;
            if let Some(score) = n.sentiment_score {
                sentiment_sum += score;
                sentiment_count += 1;
            }
        }

        let average_sentiment = if sentiment_count > 0 {
            sentiment_sum / sentiment_count as f64
        } else {
            0.5
        };

        let peak_hour = hour_distribution
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(hour, _)| *hour);
        let most_common_category = category_distribution
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(category, _)| category.clone());

        PatternSummary {
            total_notifications: notifications.len(),
            hour_distribution,
            category_distribution,
            average_sentiment,
            peak_hour,
            most_common_category,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn assistant() -> Assistant {
        Assistant::new(AssistantConfig::default())
    }

    #[test]
    fn test_sentiment_positive() {
        let result = assistant().analyze_sentiment("great work, excellent attendance today");
        assert_eq!(result.sentiment, Sentiment::Positive);
        assert!(result.confidence > 0.0);
    }

    #[test]
    fn test_sentiment_negative() {
        let result = assistant().analyze_sentiment("terrible outage, awful experience");
        assert_eq!(result.sentiment, Sentiment::Negative);
    }

    #[test]
    fn test_sentiment_neutral_on_empty() {
        let result = assistant().analyze_sentiment("");
        assert_eq!(result.sentiment, Sentiment::Neutral);
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn test_categorize_alert() {
        let result = assistant().categorize("Urgent alert", "critical emergency in lab 3");
        assert_eq!(result.category, "alert");
    }

    #[test]
    fn test_categorize_zero_hits_resolves_to_first_entry() {
        // No keyword matches anywhere; the tie lands on the first table
        // entry with zero confidence.
        let result = assistant().categorize("hello", "just saying hi");
        assert_eq!(result.category, "attendance");
        assert_eq!(result.confidence, 0.0);
        assert!(result.scores.values().all(|s| *s == 0));
    }

    #[test]
    fn test_priority_monotonic_in_category_table() {
        let a = assistant();
        // Same neutral text so only the category differs.
        let alert = a.calculate_priority("note", "note", "alert", Sentiment::Neutral);
        let system = a.calculate_priority("note", "note", "system", Sentiment::Neutral);
        let meeting = a.calculate_priority("note", "note", "meeting", Sentiment::Neutral);
        let general = a.calculate_priority("note", "note", "general", Sentiment::Neutral);

        assert!(alert >= system);
        assert!(system >= meeting);
        assert!(meeting >= general);
        assert_eq!(alert, 5);
        assert_eq!(general, 1);
    }

    #[test]
    fn test_priority_sentiment_adjustment() {
        let a = assistant();
        let base = a.calculate_priority("note", "note", "meeting", Sentiment::Neutral);
        let negative = a.calculate_priority("note", "note", "meeting", Sentiment::Negative);
        let positive = a.calculate_priority("note", "note", "meeting", Sentiment::Positive);

        assert_eq!(negative, base + 1);
        assert_eq!(positive, base - 1);
    }

    #[test]
    fn test_priority_urgent_boost_is_clamped() {
        let a = assistant();
        let p = a.calculate_priority("URGENT", "respond immediately", "alert", Sentiment::Negative);
        assert_eq!(p, 5);

        let floor = a.calculate_priority("nice note", "all good", "general", Sentiment::Positive);
        assert_eq!(floor, 1);
    }

    #[test]
    fn test_extract_keywords_filters_and_ranks() {
        let keywords = assistant().extract_keywords(
            "exam exam exam schedule for the midterm schedule room",
            3,
        );
        assert_eq!(keywords[0], "exam");
        assert_eq!(keywords[1], "schedule");
        assert!(!keywords.contains(&"the".to_string()));
        assert!(!keywords.contains(&"for".to_string()));
    }

    #[test]
    fn test_suggest_optimal_time_next_slot_today() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 10, 30, 0).unwrap();
        let suggested = assistant().suggest_optimal_time("attendance", None, now);
        // Slots are 9/13/17; the next after 10:30 is 13:00 today.
        assert_eq!(suggested.hour(), 13);
        assert_eq!(suggested.date_naive(), now.date_naive());
    }

    #[test]
    fn test_suggest_optimal_time_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 21, 0, 0).unwrap();
        let suggested = assistant().suggest_optimal_time("attendance", None, now);
        assert_eq!(suggested.hour(), 9);
        assert_eq!(suggested.date_naive(), (now + Duration::days(1)).date_naive());
    }

    #[test]
    fn test_suggest_optimal_time_honors_preferences() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        let suggested = assistant().suggest_optimal_time("attendance", Some("08:00,11:00"), now);
        assert_eq!(suggested.hour(), 11);
    }

    #[test]
    fn test_suggest_optimal_time_keeps_preference_order() {
        // The first listed upcoming hour wins, not the smallest.
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 10, 0, 0).unwrap();
        let suggested = assistant().suggest_optimal_time("attendance", Some("16:00,11:00"), now);
        assert_eq!(suggested.hour(), 16);
        assert_eq!(suggested.date_naive(), now.date_naive());
    }

    #[test]
    fn test_suggest_optimal_time_tomorrow_uses_earliest_preference() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 21, 0, 0).unwrap();
        let suggested = assistant().suggest_optimal_time("attendance", Some("16:00,11:00"), now);
        assert_eq!(suggested.hour(), 11);
        assert_eq!(suggested.date_naive(), (now + Duration::days(1)).date_naive());
    }

    #[test]
    fn test_generate_smart_notification_clamps_message() {
        let mut config = AssistantConfig::default();
        config.max_message_length = 40;
        let a = Assistant::new(config);

        let long_context = "maintenance ".repeat(50);
        let smart = a.generate_smart_notification(&long_context, "system", Utc::now());
        assert!(smart.message.chars().count() <= 40);
        assert_eq!(smart.category, "system");
    }

    #[test]
    fn test_analyze_patterns_empty() {
        let summary = assistant().analyze_patterns(&[]);
        assert_eq!(summary.total_notifications, 0);
        assert!(summary.peak_hour.is_none());
    }
}
