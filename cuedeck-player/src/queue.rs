//! Track queue and play history
//!
//! The queue holds tracks waiting behind the current one, in play order.
//! History keeps the most recently finished tracks, newest last, bounded by
//! `history_limit`.

use cuedeck_common::Track;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct TrackQueue {
    entries: VecDeque<Track>,
    history: VecDeque<Track>,
    history_limit: usize,
}

impl TrackQueue {
    pub fn new(history_limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            history: VecDeque::new(),
            history_limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_back(&mut self, track: Track) {
        self.entries.push_back(track);
    }

    pub fn push_front(&mut self, track: Track) {
        self.entries.push_front(track);
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        self.entries.pop_front()
    }

    /// Next track to play: the head, or a random entry in shuffle mode
    pub fn pop_next<R: Rng + ?Sized>(&mut self, shuffle: bool, rng: &mut R) -> Option<Track> {
        if shuffle && self.entries.len() > 1 {
            let index = rng.gen_range(0..self.entries.len());
            self.entries.remove(index)
        } else {
            self.entries.pop_front()
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Track> {
        self.entries.remove(index)
    }

    /// Move the entry at `from` so it ends up at `to`.
    ///
    /// Returns false when either index is out of range.
    pub fn move_entry(&mut self, from: usize, to: usize) -> bool {
        if from >= self.entries.len() || to >= self.entries.len() {
            return false;
        }
        if let Some(track) = self.entries.remove(from) {
            self.entries.insert(to, track);
        }
        true
    }

    /// Uniform in-place permutation
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.entries.make_contiguous().shuffle(rng);
    }

    /// Drop all queued tracks, returning how many there were
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.entries.iter()
    }

    /// Mutable access for refining metadata in place
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.entries.iter_mut()
    }

    pub fn to_vec(&self) -> Vec<Track> {
        self.entries.iter().cloned().collect()
    }

    /// Sum of known durations, in seconds
    pub fn total_duration_secs(&self) -> f64 {
        self.entries.iter().filter_map(|t| t.duration_secs).sum()
    }

    pub fn push_history(&mut self, track: Track) {
        if self.history_limit == 0 {
            return;
        }
        self.history.push_back(track);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    /// Most recently finished track
    pub fn pop_history(&mut self) -> Option<Track> {
        self.history.pop_back()
    }

    pub fn last_played(&self) -> Option<&Track> {
        self.history.back()
    }

    pub fn history(&self) -> Vec<Track> {
        self.history.iter().cloned().collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuedeck_common::Platform;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn track(name: &str) -> Track {
        Track::new(format!("https://cdn.example/{}.mp3", name), name, Platform::Direct)
    }

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue.iter().map(|t| t.title.clone()).collect()
    }

    fn queue_of(names: &[&str]) -> TrackQueue {
        let mut queue = TrackQueue::new(50);
        for name in names {
            queue.push_back(track(name));
        }
        queue
    }

    #[test]
    fn test_pop_next_in_order() {
        let mut queue = queue_of(&["a", "b", "c"]);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(queue.pop_next(false, &mut rng).unwrap().title, "a");
        assert_eq!(queue.pop_next(false, &mut rng).unwrap().title, "b");
        assert_eq!(titles(&queue), vec!["c"]);
    }

    #[test]
    fn test_pop_next_shuffle_takes_one_entry() {
        let mut queue = queue_of(&["a", "b", "c", "d"]);
        let mut rng = StdRng::seed_from_u64(7);
        let picked = queue.pop_next(true, &mut rng).unwrap();
        assert_eq!(queue.len(), 3);
        assert!(!titles(&queue).contains(&picked.title));
    }

    #[test]
    fn test_shuffle_preserves_multiset() {
        let names = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let mut queue = queue_of(&names);
        queue.shuffle(&mut StdRng::seed_from_u64(42));

        let mut shuffled = titles(&queue);
        shuffled.sort();
        assert_eq!(shuffled, names.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn test_move_entry() {
        let mut queue = queue_of(&["a", "b", "c", "d"]);
        assert!(queue.move_entry(0, 2));
        assert_eq!(titles(&queue), vec!["b", "c", "a", "d"]);
        assert!(queue.move_entry(3, 0));
        assert_eq!(titles(&queue), vec!["d", "b", "c", "a"]);
        assert!(!queue.move_entry(4, 0));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut queue = TrackQueue::new(2);
        queue.push_history(track("a"));
        queue.push_history(track("b"));
        queue.push_history(track("c"));

        let history: Vec<String> = queue.history().into_iter().map(|t| t.title).collect();
        assert_eq!(history, vec!["b", "c"]);
        assert_eq!(queue.last_played().unwrap().title, "c");
        assert_eq!(queue.pop_history().unwrap().title, "c");
    }

    #[test]
    fn test_total_duration_skips_unknown() {
        let mut queue = TrackQueue::new(5);
        queue.push_back(track("a").with_duration_secs(120.0));
        queue.push_back(track("b"));
        queue.push_back(track("c").with_duration_secs(30.5));
        assert!((queue.total_duration_secs() - 150.5).abs() < f64::EPSILON);
    }
}
