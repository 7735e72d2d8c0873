use std::collections::VecDeque;
use std::time::Duration;

use shared::PlaybackState;

use crate::clients::SynthesizedAudio;
use crate::error::PlaybackError;

pub type ItemId = u64;

/// The device (or stand-in) that actually sounds audio.
///
/// The queue guarantees `play` is never called while another item is sounding, and
/// that `release` is called exactly once for every item it accepted.
pub trait AudioSink: Send {
    fn play(&mut self, id: ItemId, audio: &SynthesizedAudio) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn resume(&mut self);
    /// Silence the sounding item, if any.
    fn halt(&mut self);
    fn release(&mut self, id: ItemId);

    /// Let `elapsed` pass; returns the item that ended naturally, if any.
    /// Sinks that report completion on their own never return anything here.
    fn elapse(&mut self, _elapsed: Duration) -> Option<ItemId> {
        None
    }
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn play(&mut self, id: ItemId, audio: &SynthesizedAudio) -> Result<(), PlaybackError> {
        (**self).play(id, audio)
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn resume(&mut self) {
        (**self).resume()
    }

    fn halt(&mut self) {
        (**self).halt()
    }

    fn release(&mut self, id: ItemId) {
        (**self).release(id)
    }

    fn elapse(&mut self, elapsed: Duration) -> Option<ItemId> {
        (**self).elapse(elapsed)
    }
}

/// Server-side stand-in for a speaker: an item "sounds" for its decoded duration.
#[derive(Debug, Default)]
pub struct ClockSink {
    sounding: Option<(ItemId, Duration)>,
    paused: bool,
}

impl ClockSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioSink for ClockSink {
    fn play(&mut self, id: ItemId, audio: &SynthesizedAudio) -> Result<(), PlaybackError> {
        if audio.bytes.is_empty() {
            return Err(PlaybackError::Start(id, "empty audio".into()));
        }
        self.sounding = Some((id, audio.duration));
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn halt(&mut self) {
        self.sounding = None;
        self.paused = false;
    }

    fn release(&mut self, id: ItemId) {
        if matches!(self.sounding, Some((sounding, _)) if sounding == id) {
            self.sounding = None;
        }
    }

    fn elapse(&mut self, elapsed: Duration) -> Option<ItemId> {
        if self.paused {
            return None;
        }
        let (id, remaining) = self.sounding.as_mut()?;
        *remaining = remaining.saturating_sub(elapsed);
        if remaining.is_zero() {
            let id = *id;
            self.sounding = None;
            Some(id)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct AudioItem {
    id: ItemId,
    audio: SynthesizedAudio,
    /// Set when playback starts, not when it ends.
    played: bool,
}

/// Serial player for synthesized narration and conversation audio.
///
/// Items are kept after playing, so starting from `Stopped` replays everything
/// queued since the last `stop`; played items beyond `max_retained` are released
/// oldest first.
pub struct AudioPlaybackQueue<S: AudioSink> {
    sink: S,
    items: VecDeque<AudioItem>,
    current: Option<ItemId>,
    state: PlaybackState,
    max_retained: usize,
}

impl<S: AudioSink> AudioPlaybackQueue<S> {
    pub fn new(sink: S, autoplay: bool, max_retained: usize) -> Self {
        Self {
            sink,
            items: VecDeque::new(),
            current: None,
            state: if autoplay {
                PlaybackState::Playing
            } else {
                PlaybackState::Stopped
            },
            max_retained,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current(&self) -> Option<ItemId> {
        self.current
    }

    pub fn current_audio(&self) -> Option<(ItemId, &SynthesizedAudio)> {
        let id = self.current?;
        self.items
            .iter()
            .find(|item| item.id == id)
            .map(|item| (item.id, &item.audio))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unplayed(&self) -> usize {
        self.items.iter().filter(|item| !item.played).count()
    }

    /// Append in arrival order.
    pub fn enqueue(&mut self, id: ItemId, audio: SynthesizedAudio) {
        tracing::debug!(id, duration_ms = audio.duration.as_millis() as u64, "audio queued");
        self.items.push_back(AudioItem {
            id,
            audio,
            played: false,
        });
        self.select_next();
        self.trim();
    }

    /// Queue ahead of every item that has not started yet. The sounding item is
    /// left to finish.
    pub fn enqueue_priority(&mut self, id: ItemId, audio: SynthesizedAudio) {
        let slot = self
            .items
            .iter()
            .position(|item| !item.played)
            .unwrap_or(self.items.len());
        tracing::debug!(id, slot, "priority audio queued");
        self.items.insert(
            slot,
            AudioItem {
                id,
                audio,
                played: false,
            },
        );
        self.select_next();
        self.trim();
    }

    fn select_next(&mut self) {
        if self.state != PlaybackState::Playing || self.current.is_some() {
            return;
        }
        while let Some(item) = self.items.iter_mut().find(|item| !item.played) {
            item.played = true;
            match self.sink.play(item.id, &item.audio) {
                Ok(()) => {
                    tracing::info!(id = item.id, "audio playing");
                    self.current = Some(item.id);
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping audio item");
                }
            }
        }
    }

    /// The sounding item ended on its own.
    pub fn on_finished(&mut self, id: ItemId) -> bool {
        if self.current != Some(id) {
            return false;
        }
        tracing::debug!(id, "audio finished");
        self.current = None;
        self.select_next();
        self.trim();
        true
    }

    /// The sounding item failed mid-playback; move on as if it had finished.
    pub fn on_error(&mut self, err: PlaybackError) -> bool {
        let id = match &err {
            PlaybackError::Start(id, _) | PlaybackError::Interrupted(id, _) => *id,
        };
        if self.current != Some(id) {
            return false;
        }
        tracing::warn!(error = %err, "audio failed, advancing");
        self.sink.halt();
        self.current = None;
        self.select_next();
        self.trim();
        true
    }

    /// Drive sinks that track time themselves.
    pub fn elapse(&mut self, elapsed: Duration) {
        if let Some(id) = self.sink.elapse(elapsed) {
            self.on_finished(id);
        }
    }

    pub fn toggle(&mut self) -> PlaybackState {
        match self.state {
            PlaybackState::Playing => {
                self.state = PlaybackState::Paused;
                if self.current.is_some() {
                    self.sink.pause();
                }
            }
            PlaybackState::Paused => {
                self.state = PlaybackState::Playing;
                if self.current.is_some() {
                    self.sink.resume();
                } else {
                    self.select_next();
                }
            }
            PlaybackState::Stopped => {
                self.state = PlaybackState::Playing;
                for item in &mut self.items {
                    item.played = false;
                }
                self.select_next();
            }
        }
        tracing::info!(state = ?self.state, "playback toggled");
        self.state
    }

    /// Halt playback and release every queued item.
    pub fn stop(&mut self) {
        if self.current.take().is_some() {
            self.sink.halt();
        }
        let released = self.items.len();
        for item in self.items.drain(..) {
            self.sink.release(item.id);
        }
        self.state = PlaybackState::Stopped;
        tracing::info!(released, "playback stopped");
    }

    fn trim(&mut self) {
        let mut excess = self
            .items
            .iter()
            .filter(|item| item.played && Some(item.id) != self.current)
            .count()
            .saturating_sub(self.max_retained);
        while excess > 0 {
            let Some(slot) = self
                .items
                .iter()
                .position(|item| item.played && Some(item.id) != self.current)
            else {
                break;
            };
            if let Some(item) = self.items.remove(slot) {
                self.sink.release(item.id);
                tracing::debug!(id = item.id, "released played audio");
            }
            excess -= 1;
        }
    }
}

impl<S: AudioSink> Drop for AudioPlaybackQueue<S> {
    fn drop(&mut self) {
        if self.current.take().is_some() {
            self.sink.halt();
        }
        for item in self.items.drain(..) {
            self.sink.release(item.id);
        }
    }
}
