//! Short-form classification.
//!
//! The Data API has no "is short" attribute, so this is a curated heuristic:
//! a video is a short when its description is blank, or when it sits in a
//! playlist listed in the configured rule table and is not one of that
//! playlist's exceptions. Wrong classifications are fixed in the rule table,
//! not here.

use std::collections::{HashMap, HashSet};

use crate::models::ShortPlaylistRule;
use crate::utils::is_blank;

#[derive(Debug, Clone, Default)]
pub struct ShortClassifier {
    /// playlist id -> exception video ids (None or empty: every video is short)
    rules: HashMap<String, Option<HashSet<String>>>,
}

impl ShortClassifier {
    pub fn new(rules: Vec<ShortPlaylistRule>) -> Self {
        let mut table = HashMap::new();
        for rule in rules {
            // first rule for a playlist wins
            table
                .entry(rule.playlist_id)
                .or_insert_with(|| rule.exceptional_videos.map(|v| v.into_iter().collect()));
        }
        ShortClassifier { rules: table }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn is_short(&self, video_id: &str, playlist_id: &str, description: Option<&str>) -> bool {
        if is_blank(description) {
            return true;
        }

        match self.rules.get(playlist_id) {
            None => false,
            Some(None) => true,
            Some(Some(exceptions)) if exceptions.is_empty() => true,
            Some(Some(exceptions)) => !exceptions.contains(video_id),
        }
    }
}
