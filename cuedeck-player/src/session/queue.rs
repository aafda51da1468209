//! Queue operations on a session

use cuedeck_common::{time, Requester, Track};
use std::sync::Arc;
use tracing::{debug, info};

use super::actor::PlaybackSession;
use super::handle::AddOutcome;
use crate::error::{Error, Result};

impl PlaybackSession {
    /// Append resolved tracks; start playing if the session was idle
    pub(super) async fn enqueue(&mut self, tracks: Vec<Track>, requester: Option<Requester>) -> Result<AddOutcome> {
        if tracks.is_empty() {
            return Err(Error::Resolution("nothing to add".to_string()));
        }
        let is_playlist = tracks.len() > 1;
        let was_idle = self.current.is_none();

        let occupied = self.queue.len() + usize::from(!was_idle);
        let free = self.config.session.max_queue_size.saturating_sub(occupied);
        if free == 0 {
            return Err(Error::BadRequest(format!(
                "queue is full ({} tracks)",
                self.config.session.max_queue_size
            )));
        }
        let limit = free.min(self.config.session.max_playlist_size);
        if tracks.len() > limit {
            info!("Adding {} of {} tracks", limit, tracks.len());
        }

        let added_at = time::now();
        let added: Vec<Track> = tracks
            .into_iter()
            .take(limit)
            .map(|mut track| {
                track.stamp(requester.clone(), added_at);
                track
            })
            .collect();

        for (i, track) in added.iter().enumerate() {
            self.queue.push_back(track.clone());
            // The head of an idle session is about to be resolved anyway
            if was_idle && i == 0 {
                continue;
            }
            self.preload.schedule(
                track.clone(),
                Arc::clone(&self.services.provider),
                self.destination.clone(),
            );
        }
        debug!("Queued {} tracks, queue length {}", added.len(), self.queue.len());

        let mut started = false;
        if was_idle {
            if let Some(first) = self.queue.pop_front() {
                self.set_current(first);
                match self.start_current(0).await {
                    Ok(()) => started = true,
                    Err(e) => {
                        if self.absorb_start_failure(&e) {
                            self.advance().await;
                            started = self.attempt.is_some();
                        }
                    }
                }
            }
        }

        Ok(AddOutcome {
            tracks: added,
            is_playlist,
            queue_len: self.queue.len(),
            started,
        })
    }

    /// Permute the queue once; needs at least two queued tracks
    pub(super) fn shuffle_queue(&mut self) -> Result<()> {
        if self.queue.len() < 2 {
            return Err(Error::BadRequest(
                "need at least two queued tracks to shuffle".to_string(),
            ));
        }
        self.queue.shuffle(&mut rand::thread_rng());
        info!("Shuffled {} queued tracks", self.queue.len());
        Ok(())
    }

    pub(super) fn remove(&mut self, index: usize) -> Result<Track> {
        let track = self
            .queue
            .remove(index)
            .ok_or_else(|| Error::BadRequest(format!("no queued track at position {}", index)))?;
        let key = track.key();
        // Entries are shared by every queued copy of a track
        if !self.queue.iter().any(|queued| queued.key() == key) {
            self.preload.take(&key);
        }
        Ok(track)
    }

    pub(super) fn move_track(&mut self, from: usize, to: usize) -> Result<()> {
        if self.queue.move_entry(from, to) {
            Ok(())
        } else {
            Err(Error::BadRequest(format!(
                "cannot move {} to {} in a queue of {}",
                from,
                to,
                self.queue.len()
            )))
        }
    }

    pub(super) fn clear_queue(&mut self) -> usize {
        let removed = self.queue.clear();
        self.preload.clear();
        info!("Cleared {} queued tracks", removed);
        removed
    }
}
