//! The playback state machine.
//!
//! `PlaybackScheduler` never touches timers, the network or the screen. It
//! consumes `SchedulerEvent`s one at a time and answers each with the
//! `SchedulerCommand`s the runtime must carry out. Every presented item gets a
//! fresh `play_id`; terminal events carrying any other id are stale and
//! ignored, so each item advances the cursor at most once.

use log::{debug, info, trace, warn};
use std::time::Duration;

use super::model::{ContentQueue, GateState, MediaKind, Presentation};

/// Channel every background task uses to talk to the scheduler.
pub type EventSender = tokio::sync::mpsc::UnboundedSender<SchedulerEvent>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<SchedulerEvent>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    /// Waiting for the first queue.
    Idle,
    ShowingImage,
    ShowingVideo,
    /// Nothing to play; a queue rebuild is scheduled.
    EmptyRetry,
    /// Outside business hours.
    Dormant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A fully built queue, cached or fresh.
    QueueReady(ContentQueue),
    /// Neither cached nor fresh content could be obtained.
    ContentUnavailable,
    ImageElapsed { play_id: u64 },
    VideoEnded { play_id: u64 },
    PlaybackFailed { play_id: u64, reason: String },
    RetryElapsed,
    GateChanged(GateState),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchedulerCommand {
    Present(Presentation),
    StartImageTimer { play_id: u64, after: Duration },
    ScheduleRetry { after: Duration },
    PrepareContent,
}

/// Queue, cursor and the id of the item on screen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlaybackSession {
    pub queue: ContentQueue,
    pub cursor: usize,
    pub play_id: u64,
}

#[derive(Debug)]
pub struct PlaybackScheduler {
    state: PlaybackState,
    session: PlaybackSession,
    retry_pending: bool,
    image_duration: Duration,
    empty_retry_delay: Duration,
}

impl PlaybackScheduler {
    pub fn new(image_duration: Duration, empty_retry_delay: Duration) -> Self {
        Self {
            state: PlaybackState::Idle,
            session: PlaybackSession::default(),
            retry_pending: false,
            image_duration,
            empty_retry_delay,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn handle(&mut self, event: SchedulerEvent) -> Vec<SchedulerCommand> {
        trace!("Scheduler in {:?} handling {:?}", self.state, event);
        match event {
            SchedulerEvent::QueueReady(queue) => self.on_queue_ready(queue),
            SchedulerEvent::ContentUnavailable => match self.state {
                PlaybackState::Idle | PlaybackState::EmptyRetry if self.session.queue.is_empty() => self.enter_empty_retry(),
                _ => Vec::new(),
            },
            SchedulerEvent::ImageElapsed { play_id } => self.on_terminal(play_id, PlaybackState::ShowingImage, "display time elapsed"),
            SchedulerEvent::VideoEnded { play_id } => self.on_terminal(play_id, PlaybackState::ShowingVideo, "video ended"),
            SchedulerEvent::PlaybackFailed { play_id, reason } => {
                if self.is_current(play_id) {
                    warn!("Skipping item {} of queue after playback failure: {}", self.session.cursor, reason);
                    self.advance()
                } else {
                    debug!("Ignoring stale playback failure for play {}: {}", play_id, reason);
                    Vec::new()
                }
            }
            SchedulerEvent::RetryElapsed => {
                self.retry_pending = false;
                if self.state == PlaybackState::EmptyRetry {
                    info!("Retrying content preparation.");
                    vec![SchedulerCommand::PrepareContent]
                } else {
                    Vec::new()
                }
            }
            SchedulerEvent::GateChanged(GateState::Closed) => {
                if self.state == PlaybackState::Dormant {
                    return Vec::new();
                }
                info!("Business hours closed, going dormant.");
                self.state = PlaybackState::Dormant;
                self.session.play_id += 1;
                vec![SchedulerCommand::Present(Presentation::Dormant)]
            }
            SchedulerEvent::GateChanged(GateState::Open) => {
                if self.state != PlaybackState::Dormant {
                    return Vec::new();
                }
                info!("Business hours open, resuming playback.");
                self.play_current()
            }
        }
    }

    fn on_queue_ready(&mut self, queue: ContentQueue) -> Vec<SchedulerCommand> {
        let playing = matches!(self.state, PlaybackState::ShowingImage | PlaybackState::ShowingVideo);
        if playing && queue == self.session.queue {
            trace!("Queue unchanged, nothing to do.");
            return Vec::new();
        }
        info!("Swapping in a queue of {} item(s).", queue.len());
        debug!("Queue order: {:?}", queue.items().iter().map(|m| m.url.as_str()).collect::<Vec<_>>());
        self.session.queue = queue;
        if self.session.cursor >= self.session.queue.len() {
            self.session.cursor = 0;
        }
        match self.state {
            PlaybackState::Idle | PlaybackState::EmptyRetry => self.play_current(),
            // The item on screen finishes; the next advance reads the new queue.
            PlaybackState::ShowingImage | PlaybackState::ShowingVideo | PlaybackState::Dormant => Vec::new(),
        }
    }

    fn is_current(&self, play_id: u64) -> bool {
        play_id == self.session.play_id
            && matches!(self.state, PlaybackState::ShowingImage | PlaybackState::ShowingVideo)
    }

    fn on_terminal(&mut self, play_id: u64, expected: PlaybackState, what: &str) -> Vec<SchedulerCommand> {
        if self.state != expected || !self.is_current(play_id) {
            debug!("Ignoring stale '{}' for play {}", what, play_id);
            return Vec::new();
        }
        debug!("Item {} finished: {}", self.session.cursor, what);
        self.advance()
    }

    fn advance(&mut self) -> Vec<SchedulerCommand> {
        let len = self.session.queue.len();
        if len == 0 {
            return self.enter_empty_retry();
        }
        self.session.cursor = (self.session.cursor + 1) % len;
        self.play_current()
    }

    fn play_current(&mut self) -> Vec<SchedulerCommand> {
        let media = match self.session.queue.item_at(self.session.cursor) {
            Ok(media) => media.clone(),
            Err(e) => {
                debug!("{}", e);
                return self.enter_empty_retry();
            }
        };
        self.session.play_id += 1;
        let play_id = self.session.play_id;
        info!("Playing item {}/{} ({:?}): {}", self.session.cursor + 1, self.session.queue.len(), media.kind, media.url);
        match media.kind {
            MediaKind::Image => {
                self.state = PlaybackState::ShowingImage;
                vec![
                    SchedulerCommand::Present(Presentation::Image { play_id, media }),
                    SchedulerCommand::StartImageTimer { play_id, after: self.image_duration },
                ]
            }
            MediaKind::Video => {
                self.state = PlaybackState::ShowingVideo;
                vec![SchedulerCommand::Present(Presentation::Video { play_id, media })]
            }
        }
    }

    fn enter_empty_retry(&mut self) -> Vec<SchedulerCommand> {
        self.state = PlaybackState::EmptyRetry;
        self.session.play_id += 1;
        let mut commands = vec![SchedulerCommand::Present(Presentation::Placeholder)];
        if !self.retry_pending {
            warn!("No content to play, retrying in {:?}.", self.empty_retry_delay);
            self.retry_pending = true;
            commands.push(SchedulerCommand::ScheduleRetry { after: self.empty_retry_delay });
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaReference;
    use crate::queue_builder;

    const IMAGE_TIME: Duration = Duration::from_secs(45);
    const RETRY_TIME: Duration = Duration::from_secs(10);

    fn scheduler() -> PlaybackScheduler {
        PlaybackScheduler::new(IMAGE_TIME, RETRY_TIME)
    }

    fn three_items() -> ContentQueue {
        queue_builder::build(
            &[MediaReference::image("img0"), MediaReference::image("img1")],
            &[MediaReference::video("vid0")],
        )
    }

    fn presented(commands: &[SchedulerCommand]) -> Option<&Presentation> {
        commands.iter().find_map(|c| match c {
            SchedulerCommand::Present(p) => Some(p),
            _ => None,
        })
    }

    fn retries(commands: &[SchedulerCommand]) -> Vec<Duration> {
        commands
            .iter()
            .filter_map(|c| match c {
                SchedulerCommand::ScheduleRetry { after } => Some(*after),
                _ => None,
            })
            .collect()
    }

    /// Finishes whatever is on screen the way the runtime would.
    fn finish_current(s: &mut PlaybackScheduler, fail: bool) -> Vec<SchedulerCommand> {
        let play_id = s.session().play_id;
        let event = if fail {
            SchedulerEvent::PlaybackFailed { play_id, reason: "broken".into() }
        } else if s.state() == PlaybackState::ShowingImage {
            SchedulerEvent::ImageElapsed { play_id }
        } else {
            SchedulerEvent::VideoEnded { play_id }
        };
        s.handle(event)
    }

    #[test]
    fn first_queue_starts_with_an_image_and_timer() {
        let mut s = scheduler();
        assert_eq!(s.state(), PlaybackState::Idle);
        let commands = s.handle(SchedulerEvent::QueueReady(three_items()));
        assert_eq!(
            commands,
            vec![
                SchedulerCommand::Present(Presentation::Image { play_id: 1, media: MediaReference::image("img0") }),
                SchedulerCommand::StartImageTimer { play_id: 1, after: IMAGE_TIME },
            ]
        );
        assert_eq!(s.state(), PlaybackState::ShowingImage);
    }

    #[test]
    fn video_advances_only_on_end() {
        let mut s = scheduler();
        s.handle(SchedulerEvent::QueueReady(three_items()));
        let commands = finish_current(&mut s, false);
        assert!(matches!(presented(&commands), Some(Presentation::Video { .. })));
        assert!(!commands.iter().any(|c| matches!(c, SchedulerCommand::StartImageTimer { .. })));
        assert_eq!(s.state(), PlaybackState::ShowingVideo);
        let play_id = s.session().play_id;
        assert!(s.handle(SchedulerEvent::ImageElapsed { play_id }).is_empty());
        let commands = finish_current(&mut s, false);
        assert!(matches!(presented(&commands), Some(Presentation::Image { media, .. }) if media.url == "img1"));
    }

    #[test]
    fn failing_item_is_skipped_and_rotation_stays_live() {
        let mut s = scheduler();
        s.handle(SchedulerEvent::QueueReady(three_items()));
        let mut visited = vec![s.session().cursor];
        for _ in 0..8 {
            let fail = s.session().cursor == 1;
            let commands = finish_current(&mut s, fail);
            assert!(presented(&commands).is_some(), "rotation stalled at {}", s.session().cursor);
            visited.push(s.session().cursor);
        }
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn stale_terminal_events_do_not_double_advance() {
        let mut s = scheduler();
        s.handle(SchedulerEvent::QueueReady(three_items()));
        let first = s.session().play_id;
        s.handle(SchedulerEvent::PlaybackFailed { play_id: first, reason: "404".into() });
        assert_eq!(s.session().cursor, 1);
        assert!(s.handle(SchedulerEvent::ImageElapsed { play_id: first }).is_empty());
        assert_eq!(s.session().cursor, 1);
    }

    #[test]
    fn empty_queue_schedules_exactly_one_delayed_retry() {
        let mut s = scheduler();
        let commands = s.handle(SchedulerEvent::QueueReady(queue_builder::build(&[], &[])));
        assert_eq!(presented(&commands), Some(&Presentation::Placeholder));
        assert_eq!(retries(&commands), vec![RETRY_TIME]);
        assert_eq!(s.state(), PlaybackState::EmptyRetry);

        // More empty results before the timer fires add no second retry.
        assert!(retries(&s.handle(SchedulerEvent::QueueReady(ContentQueue::default()))).is_empty());
        assert!(retries(&s.handle(SchedulerEvent::ContentUnavailable)).is_empty());

        // One retry per cycle: timer → prepare → still empty → one new retry.
        assert_eq!(s.handle(SchedulerEvent::RetryElapsed), vec![SchedulerCommand::PrepareContent]);
        assert_eq!(retries(&s.handle(SchedulerEvent::QueueReady(ContentQueue::default()))), vec![RETRY_TIME]);
    }

    #[test]
    fn content_unavailable_at_startup_enters_retry() {
        let mut s = scheduler();
        let commands = s.handle(SchedulerEvent::ContentUnavailable);
        assert_eq!(retries(&commands), vec![RETRY_TIME]);
        let commands = s.handle(SchedulerEvent::QueueReady(three_items()));
        assert!(matches!(presented(&commands), Some(Presentation::Image { .. })));
        // The pending retry fires after content arrived and is ignored.
        assert!(s.handle(SchedulerEvent::RetryElapsed).is_empty());
    }

    #[test]
    fn fresh_queue_does_not_interrupt_current_item() {
        let mut s = scheduler();
        s.handle(SchedulerEvent::QueueReady(three_items()));
        let play_id = s.session().play_id;
        assert!(s.handle(SchedulerEvent::QueueReady(three_items())).is_empty());

        let fresh = queue_builder::build(&[MediaReference::image("new0")], &[MediaReference::video("newvid")]);
        assert!(s.handle(SchedulerEvent::QueueReady(fresh)).is_empty());
        let commands = s.handle(SchedulerEvent::ImageElapsed { play_id });
        assert!(matches!(presented(&commands), Some(Presentation::Video { media, .. }) if media.url == "newvid"));
    }

    #[test]
    fn shrinking_queue_clamps_cursor() {
        let mut s = scheduler();
        s.handle(SchedulerEvent::QueueReady(three_items()));
        finish_current(&mut s, false);
        finish_current(&mut s, false);
        assert_eq!(s.session().cursor, 2);
        s.handle(SchedulerEvent::QueueReady(queue_builder::build(&[MediaReference::image("only")], &[])));
        assert_eq!(s.session().cursor, 0);
        let commands = finish_current(&mut s, false);
        assert!(matches!(presented(&commands), Some(Presentation::Image { media, .. }) if media.url == "only"));
    }

    #[test]
    fn gate_closes_and_reopens_playback() {
        let mut s = scheduler();
        s.handle(SchedulerEvent::QueueReady(three_items()));
        let before = s.session().play_id;
        assert_eq!(
            s.handle(SchedulerEvent::GateChanged(GateState::Closed)),
            vec![SchedulerCommand::Present(Presentation::Dormant)]
        );
        assert_eq!(s.state(), PlaybackState::Dormant);
        assert!(s.handle(SchedulerEvent::ImageElapsed { play_id: before }).is_empty());
        assert!(s.handle(SchedulerEvent::GateChanged(GateState::Closed)).is_empty());

        let commands = s.handle(SchedulerEvent::GateChanged(GateState::Open));
        assert!(matches!(presented(&commands), Some(Presentation::Image { media, .. }) if media.url == "img0"));
        assert!(s.handle(SchedulerEvent::GateChanged(GateState::Open)).is_empty());
    }

    #[test]
    fn queue_arriving_while_dormant_waits_for_open() {
        let mut s = scheduler();
        s.handle(SchedulerEvent::GateChanged(GateState::Closed));
        assert!(s.handle(SchedulerEvent::QueueReady(three_items())).is_empty());
        assert_eq!(s.state(), PlaybackState::Dormant);
        let commands = s.handle(SchedulerEvent::GateChanged(GateState::Open));
        assert!(matches!(presented(&commands), Some(Presentation::Image { .. })));
    }
}
