//! Insertion-ordered tallies and stable Top-N selection.
//!
//! Ties always resolve to first-seen order: every map here remembers the
//! order keys were first inserted and [`top_n`] uses a stable sort.

use std::collections::{HashMap, HashSet};

/// Default length of every ranked list.
pub const TOP_N: usize = 10;

/// Play count and distinct viewers for one piece of content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentAggregate {
    pub title: String,
    pub thumb: Option<String>,
    pub media_type: String,
    pub year: Option<u32>,
    pub plays: u64,
    viewers: HashSet<String>,
}

impl ContentAggregate {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            thumb: None,
            media_type: String::new(),
            year: None,
            plays: 0,
            viewers: HashSet::new(),
        }
    }

    /// Number of distinct viewers, compared case-insensitively.
    pub fn viewer_count(&self) -> u64 {
        self.viewers.len() as u64
    }
}

/// Content keyed by identity, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct ContentMap {
    index: HashMap<String, usize>,
    entries: Vec<ContentAggregate>,
}

impl ContentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one play of `key` by `viewer`. Artwork, media type and year
    /// are taken from the first play that carries them.
    pub fn record(
        &mut self,
        key: &str,
        viewer: &str,
        thumb: Option<&str>,
        media_type: &str,
        year: Option<u32>,
    ) {
        let slot = match self.index.get(key) {
            Some(&i) => i,
            None => {
                self.entries.push(ContentAggregate::new(key));
                self.index.insert(key.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            },
        };
        let entry = &mut self.entries[slot];
        entry.plays += 1;
        entry.viewers.insert(viewer.to_lowercase());
        if entry.thumb.is_none() {
            entry.thumb = thumb.map(str::to_string);
        }
        if entry.media_type.is_empty() {
            entry.media_type = media_type.to_string();
        }
        if entry.year.is_none() {
            entry.year = year;
        }
    }

    pub fn get(&self, key: &str) -> Option<&ContentAggregate> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContentAggregate> {
        self.entries.iter()
    }

    /// Top `n` by distinct viewers.
    pub fn most_popular(&self, n: usize) -> Vec<&ContentAggregate> {
        top_n(self.entries.iter(), n, |c| c.viewer_count())
    }

    /// Top `n` by play count.
    pub fn most_watched(&self, n: usize) -> Vec<&ContentAggregate> {
        top_n(self.entries.iter(), n, |c| c.plays)
    }
}

/// Counter keyed by label, in first-seen order. Labels are compared
/// case-insensitively and reported in the spelling first seen.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    index: HashMap<String, usize>,
    entries: Vec<(String, u64)>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: &str) {
        let key = label.to_lowercase();
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 += 1,
            None => {
                self.index.insert(key, self.entries.len());
                self.entries.push((label.to_string(), 1));
            },
        }
    }

    pub fn count(&self, label: &str) -> u64 {
        self.index
            .get(&label.to_lowercase())
            .map_or(0, |&i| self.entries[i].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `n` labels by count.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        top_n(self.entries.iter(), n, |(_, c)| *c)
            .into_iter()
            .cloned()
            .collect()
    }
}

/// Sort descending by `score` and keep the first `n`. Equal scores keep
/// their input order.
pub fn top_n<T, I, F>(items: I, n: usize, score: F) -> Vec<T>
where
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> u64,
{
    let mut ranked: Vec<T> = items.into_iter().collect();
    ranked.sort_by_key(|item| std::cmp::Reverse(score(item)));
    ranked.truncate(n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewers_are_case_insensitive() {
        let mut map = ContentMap::new();
        map.record("Show X", "alice@x.com", Some("/a"), "episode", None);
        map.record("Show X", "ALICE@x.com", Some("/b"), "episode", None);
        let show = map.get("Show X").unwrap();
        assert_eq!(show.plays, 2);
        assert_eq!(show.viewer_count(), 1);
        assert_eq!(show.thumb.as_deref(), Some("/a"));
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let mut map = ContentMap::new();
        for key in ["B", "A", "C"] {
            map.record(key, "u", None, "movie", None);
        }
        map.record("C", "v", None, "movie", None);
        let titles: Vec<_> = map.most_watched(10).iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["C", "B", "A"]);
    }

    #[test]
    fn top_n_truncates() {
        let ranked = top_n(1..=20u64, 3, |v| *v);
        assert_eq!(ranked, vec![20, 19, 18]);
        assert!(top_n(Vec::<u64>::new(), 10, |v| *v).is_empty());
    }

    #[test]
    fn tally_counts_and_orders() {
        let mut tally = Tally::new();
        for label in ["Roku", "Web", "roku", "iOS", "Web"] {
            tally.add(label);
        }
        assert_eq!(tally.count("Roku"), 2);
        assert_eq!(tally.len(), 3);
        assert_eq!(tally.count("Android"), 0);
        assert_eq!(
            tally.top(2),
            vec![("Roku".to_string(), 2), ("Web".to_string(), 2)]
        );
    }
}
