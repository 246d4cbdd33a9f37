//! Mirrors and controls the remote playback session.
//!
//! [`PlaybackSync`] keeps a [`PlaybackState`] in step with the remote using
//! two independent timers and a command queue, all driven from a single
//! task by [`PlaybackSync::run`]:
//!
//! * **Poll** (every second while logged in): reads the currently playing
//!   item. Its answer is authoritative and overwrites local state.
//! * **Ticker** (every 100 ms while playing): advances progress locally so
//!   it moves smoothly between polls. Capped at the track duration.
//! * **Commands**: play, pause, skip and seek are sent to the remote and
//!   applied optimistically. Play, pause and skips are confirmed by an extra
//!   poll shortly afterwards.
//!
//! Requests run concurrently with the timers, so a slow answer neither
//! stalls progress nor delays shutdown. Controls are sent one at a time in
//! the order they were issued. Poll results that were overtaken by a later
//! poll, or that belong to an earlier session, are dropped.
//!
//! Failures never roll back optimistic changes and are never retried
//! directly; the next scheduled poll corrects any divergence. A rejected
//! access token ends the session and stops polling.
//!
//! # Example
//!
//! ```rust
//! let mut sync = PlaybackSync::new(&config, &mut auth, api);
//! let mut events = sync.subscribe();
//! let handle = sync.handle();
//!
//! tokio::spawn(async move {
//!     handle.pause()?;
//! });
//!
//! sync.run(shutdown).await?;
//! ```

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures_util::{
    future::BoxFuture,
    stream::{FuturesUnordered, StreamExt},
    FutureExt,
};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    api::{Control, NowPlaying, WebApi},
    auth::AuthFlow,
    config::Config,
    error::{Error, ErrorKind, Result},
    events::Event,
    playback::PlaybackState,
};

/// User-issued playback commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Play,
    Pause,
    /// Pause when playing, play otherwise.
    Toggle,
    Next,
    Previous,
    Seek(Duration),
}

/// Cloneable sender of commands into a running [`PlaybackSync`].
#[derive(Clone, Debug)]
pub struct Handle {
    tx: mpsc::UnboundedSender<Command>,
}

impl Handle {
    /// Queues `command` for the sync loop.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the sync loop is gone.
    pub fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|e| Error::unavailable(format!("playback sync stopped, dropped {:?}", e.0)))
    }

    pub fn play(&self) -> Result<()> {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn toggle(&self) -> Result<()> {
        self.send(Command::Toggle)
    }

    pub fn skip_next(&self) -> Result<()> {
        self.send(Command::Next)
    }

    pub fn skip_previous(&self) -> Result<()> {
        self.send(Command::Previous)
    }

    pub fn seek(&self, position: Duration) -> Result<()> {
        self.send(Command::Seek(position))
    }
}

/// Answer to a request started by the sync engine.
struct Reply {
    /// The access token the request was sent with.
    token: String,
    outcome: Outcome,
}

enum Outcome {
    Polled { seq: u64, result: Result<NowPlaying> },
    Sent { control: Control, result: Result<()> },
}

type Request = BoxFuture<'static, Reply>;

pub struct PlaybackSync<'a> {
    auth: &'a mut AuthFlow,
    api: Arc<WebApi>,
    state: PlaybackState,
    published: watch::Sender<PlaybackState>,

    events: Option<mpsc::UnboundedSender<Event>>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: Option<mpsc::UnboundedReceiver<Command>>,

    /// When the next confirmation poll is due, if any.
    confirm_at: Option<Instant>,

    /// Sequence number of the last poll that was started.
    polls_started: u64,
    /// Sequence number of the newest poll that was applied.
    polls_applied: u64,

    poll_interval: Duration,
    tick_interval: Duration,
    confirm_delay: Duration,
}

impl<'a> PlaybackSync<'a> {
    #[must_use]
    pub fn new(config: &Config, auth: &'a mut AuthFlow, api: WebApi) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        Self {
            auth,
            api: Arc::new(api),
            state: PlaybackState::new(),
            published: watch::channel(PlaybackState::new()).0,

            events: None,
            commands_tx,
            commands_rx: Some(commands_rx),

            confirm_at: None,

            polls_started: 0,
            polls_applied: 0,

            poll_interval: config.poll_interval,
            tick_interval: config.tick_interval,
            confirm_delay: config.confirm_delay,
        }
    }

    /// Returns a receiver for events from now on. Replaces any earlier
    /// subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Returns a receiver that always holds the latest playback state, for
    /// readers on other tasks.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.published.subscribe()
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        Handle {
            tx: self.commands_tx.clone(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    #[must_use]
    pub fn auth(&self) -> &AuthFlow {
        self.auth
    }

    /// Progress of the current track in `[0, 1]`.
    #[must_use]
    pub fn progress_fraction(&self) -> f64 {
        self.state.progress_fraction()
    }

    /// Polls and ticks until `shutdown` is cancelled or the session ends.
    ///
    /// Requests still in flight are abandoned and both timers are dropped
    /// on return.
    ///
    /// # Errors
    ///
    /// Will return `Err` if not logged in, or when the access token is
    /// rejected while running (`Unauthenticated`).
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        if !self.auth.is_logged_in() {
            return Err(Error::unauthenticated("not logged in"));
        }

        let mut commands = self
            .commands_rx
            .take()
            .ok_or_else(|| Error::failed_precondition("playback sync is already running"))?;

        let result = self.run_loop(&mut commands, shutdown).await;
        self.commands_rx = Some(commands);
        self.confirm_at = None;

        result
    }

    async fn run_loop(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        // The first poll happens immediately.
        let mut poller = time::interval(self.poll_interval);
        poller.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticker = time::interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let confirmation = time::sleep(Duration::ZERO);
        tokio::pin!(confirmation);

        // Requests run alongside the timers, and are dropped with the loop.
        let mut in_flight: FuturesUnordered<Request> = FuturesUnordered::new();

        // Controls go out one at a time, in the order they were issued.
        let mut outbox: VecDeque<Control> = VecDeque::new();
        let mut sending = false;

        self.emit(Event::LoggedIn);
        debug!(
            "polling every {}ms, ticking every {}ms",
            self.poll_interval.as_millis(),
            self.tick_interval.as_millis()
        );

        loop {
            let was_playing = self.state.is_playing();

            tokio::select! {
                // Prioritize shutdown, then user input.
                biased;

                () = shutdown.cancelled() => {
                    info!("stopping playback sync");
                    if !in_flight.is_empty() {
                        debug!("abandoning {} pending requests", in_flight.len());
                    }
                    break Ok(());
                }

                Some(command) = commands.recv() => outbox.extend(self.begin(command)),

                Some(reply) = in_flight.next(), if !in_flight.is_empty() => {
                    if matches!(reply.outcome, Outcome::Sent { .. }) {
                        sending = false;
                    }
                    self.handle_reply(reply);
                }

                _ = poller.tick() => in_flight.extend(self.poll_request()),

                () = &mut confirmation, if self.confirm_at.is_some() => {
                    self.confirm_at = None;
                    in_flight.extend(self.poll_request());
                }

                _ = ticker.tick(), if self.state.is_playing() => self.tick(),
            }

            if !self.auth.is_logged_in() {
                break Err(Error::unauthenticated("access token was rejected"));
            }

            if !sending {
                if let Some(request) = outbox.pop_front().and_then(|control| self.control_request(control)) {
                    in_flight.push(request);
                    sending = true;
                }
            }

            if let Some(deadline) = self.confirm_at {
                if confirmation.deadline() != deadline {
                    confirmation.as_mut().reset(deadline);
                }
            }

            // Do not catch up on ticks missed while paused.
            if self.state.is_playing() && !was_playing {
                ticker.reset();
            }

            self.publish();
        }
    }

    /// Polls the remote once and applies the result.
    pub async fn poll(&mut self) {
        if let Some(request) = self.poll_request() {
            let reply = request.await;
            self.handle_reply(reply);
        }
    }

    fn poll_request(&mut self) -> Option<Request> {
        let token = self.auth.access_token()?.to_owned();

        self.polls_started += 1;
        let seq = self.polls_started;
        let api = Arc::clone(&self.api);

        Some(
            async move {
                let result = api.now_playing(&token).await;
                Reply {
                    token,
                    outcome: Outcome::Polled { seq, result },
                }
            }
            .boxed(),
        )
    }

    fn control_request(&self, control: Control) -> Option<Request> {
        let token = self.auth.access_token()?.to_owned();
        let api = Arc::clone(&self.api);

        Some(
            async move {
                let result = api.control(&token, control).await;
                Reply {
                    token,
                    outcome: Outcome::Sent { control, result },
                }
            }
            .boxed(),
        )
    }

    fn handle_reply(&mut self, reply: Reply) {
        let Reply { token, outcome } = reply;
        match outcome {
            Outcome::Polled { seq, result } => self.reconcile(&token, seq, result),
            Outcome::Sent { control, result } => {
                // Answers to requests from an earlier session are stale.
                if self.auth.access_token() != Some(token.as_str()) {
                    return;
                }

                if let Err(e) = result {
                    self.fail(&control.to_string(), &e);
                }

                if self.auth.is_logged_in() && !matches!(control, Control::Seek(_)) {
                    self.schedule_confirmation();
                }
            }
        }
    }

    /// Applies the result of poll number `seq`, requested with `token`.
    fn reconcile(&mut self, token: &str, seq: u64, result: Result<NowPlaying>) {
        // Answers to requests from an earlier session are stale.
        if self.auth.access_token() != Some(token) {
            debug!("discarding poll result from an earlier session");
            return;
        }

        // So is a slow poll that was overtaken by a later one.
        if seq <= self.polls_applied {
            debug!("discarding superseded poll result");
            return;
        }
        self.polls_applied = seq;

        let now = SystemTime::now();
        let events = match result {
            Ok(NowPlaying::Nothing) => self.state.stop(now),
            Ok(NowPlaying::Playing(playing)) => match playing.item {
                Some(item) => self.state.apply(
                    &item,
                    playing.progress.unwrap_or_default(),
                    playing.is_playing,
                    now,
                ),
                None => {
                    let kind = playing.currently_playing_type.as_deref().unwrap_or("unknown");
                    debug!("nothing to mirror while playing {kind}");
                    Vec::new()
                }
            },
            Err(e) => {
                self.fail("polling", &e);
                Vec::new()
            }
        };

        for event in events {
            self.emit(event);
        }
    }

    fn tick(&mut self) {
        self.state.advance(self.tick_interval);
    }

    /// Applies the local side of `command` and returns the control to send,
    /// if any.
    fn begin(&mut self, command: Command) -> Option<Control> {
        if !self.auth.is_logged_in() {
            return None;
        }

        let control = match command {
            Command::Play => self.set_playing(true),
            Command::Pause => self.set_playing(false),
            Command::Toggle => self.set_playing(!self.state.is_playing()),
            Command::Next => Control::Next,
            Command::Previous => Control::Previous,
            Command::Seek(position) => {
                // Nothing to seek in.
                if self.state.duration().is_zero() {
                    return None;
                }
                Control::Seek(self.state.seek(position))
            }
        };

        Some(control)
    }

    fn set_playing(&mut self, playing: bool) -> Control {
        if let Some(event) = self.state.set_playing(playing) {
            self.emit(event);
        }

        if playing {
            Control::Play
        } else {
            Control::Pause
        }
    }

    /// Runs `command` to completion, outside of [`PlaybackSync::run`].
    async fn perform(&mut self, command: Command) {
        if let Some(request) = self
            .begin(command)
            .and_then(|control| self.control_request(control))
        {
            let reply = request.await;
            self.handle_reply(reply);
        }
    }

    pub async fn play(&mut self) {
        self.perform(Command::Play).await;
    }

    pub async fn pause(&mut self) {
        self.perform(Command::Pause).await;
    }

    pub async fn toggle(&mut self) {
        self.perform(Command::Toggle).await;
    }

    pub async fn skip_next(&mut self) {
        self.perform(Command::Next).await;
    }

    pub async fn skip_previous(&mut self) {
        self.perform(Command::Previous).await;
    }

    /// Jumps to `position` in the current track.
    ///
    /// Progress is updated right away and stays updated even when the
    /// remote refuses; the next poll settles it. Without a track to seek in
    /// this does nothing.
    pub async fn seek(&mut self, position: Duration) {
        self.perform(Command::Seek(position)).await;
    }

    fn schedule_confirmation(&mut self) {
        self.confirm_at = Some(Instant::now() + self.confirm_delay);
    }

    fn fail(&mut self, context: &str, e: &Error) {
        if e.kind == ErrorKind::Unauthenticated {
            warn!("{context}: {e}; log in again");
            if let Err(e) = self.auth.invalidate() {
                error!("failed to clear access token: {e}");
            }

            self.state = PlaybackState::new();
            self.confirm_at = None;
            self.emit(Event::LoggedOut);
        } else if e.is_transient() {
            warn!("{context}: {e}");
        } else {
            error!("{context}: {e}");
        }
    }

    fn publish(&self) {
        self.published.send_if_modified(|published| {
            if *published == self.state {
                return false;
            }

            published.clone_from(&self.state);
            true
        });
    }

    /// Publishes the state before notifying, so listeners see what the event
    /// is about.
    fn emit(&mut self, event: Event) {
        self.publish();
        // Stop emitting once nobody is listening anymore.
        if self
            .events
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_err())
        {
            self.events = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::AuthState,
        http::Client as HttpClient,
        protocol::player::{CurrentlyPlaying, Item},
        store::{SessionStore, Slot},
    };
    use std::sync::Arc;
    use url::Url;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    const NOW_PLAYING: &str = "/v1/me/player/currently-playing";

    const TRACK: &str = r#"{
        "progress_ms": 50000,
        "is_playing": true,
        "currently_playing_type": "track",
        "item": {
            "id": "track-1",
            "name": "Song",
            "duration_ms": 200000,
            "artists": [{ "name": "One" }, { "name": "Two" }],
            "album": { "images": [{ "url": "https://img.example.com/640" }] }
        }
    }"#;

    struct Fixture {
        config: Config,
        auth: AuthFlow,
        api: Option<WebApi>,
    }

    impl Fixture {
        fn new(server: &MockServer, token: Option<&str>) -> Self {
            let base = Url::parse(&server.uri()).unwrap();
            let mut config = Config::with_endpoints(&base, &base.join("v1/").unwrap()).unwrap();
            config.confirm_delay = Duration::from_millis(50);

            let mut store = SessionStore::in_memory();
            if let Some(token) = token {
                store.set(Slot::AccessToken, token).unwrap();
            }

            let http_client = Arc::new(HttpClient::new(&config).unwrap());
            let api = WebApi::new(&config, Arc::clone(&http_client));
            let auth = AuthFlow::new(&config, http_client, store);

            Self {
                config,
                auth,
                api: Some(api),
            }
        }

        fn sync(&mut self) -> PlaybackSync<'_> {
            let api = self.api.take().unwrap();
            PlaybackSync::new(&self.config, &mut self.auth, api)
        }
    }

    async fn respond(server: &MockServer, verb: &str, route: &str, response: ResponseTemplate) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    fn track() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_string(TRACK)
    }

    #[tokio::test]
    async fn nothing_playing() {
        let server = MockServer::start().await;
        respond(&server, "GET", NOW_PLAYING, ResponseTemplate::new(204)).await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        sync.state.apply(
            &Item {
                id: Some("old".to_owned()),
                duration: Duration::from_secs(10),
                ..Default::default()
            },
            Duration::from_secs(5),
            true,
            SystemTime::now(),
        );

        sync.poll().await;

        assert_eq!(sync.state().snapshot(), None);
        assert!(!sync.state().is_playing());
        assert_eq!(sync.state().progress(), Duration::ZERO);
    }

    #[tokio::test]
    async fn playing_track_then_ticking() {
        let server = MockServer::start().await;
        respond(&server, "GET", NOW_PLAYING, track()).await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        let mut events = sync.subscribe();
        sync.poll().await;

        let snapshot = sync.state().snapshot().unwrap();
        assert_eq!(snapshot.title, "Song");
        assert_eq!(snapshot.artists, vec!["One", "Two"]);
        assert!(sync.state().is_playing());
        assert!((sync.progress_fraction() - 0.25).abs() < 1e-9);
        assert_eq!(events.try_recv().unwrap(), Event::TrackChanged);
        assert_eq!(events.try_recv().unwrap(), Event::Play);

        sync.tick();
        assert_eq!(sync.state().progress(), Duration::from_millis(50_100));
        assert!((sync.progress_fraction() - 0.2505).abs() < 1e-9);

        // The next poll is authoritative again.
        sync.poll().await;
        assert_eq!(sync.state().progress(), Duration::from_millis(50_000));
    }

    #[tokio::test]
    async fn rejected_token_logs_out() {
        let server = MockServer::start().await;
        respond(&server, "GET", NOW_PLAYING, ResponseTemplate::new(401)).await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        let mut events = sync.subscribe();
        sync.poll().await;

        assert!(!sync.auth().is_logged_in());
        assert_eq!(sync.auth().state(), AuthState::LoggedOut);
        assert_eq!(events.try_recv().unwrap(), Event::LoggedOut);
        drop(sync);

        assert_eq!(fixture.auth.access_token(), None);
    }

    #[tokio::test]
    async fn transient_failure_keeps_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NOW_PLAYING))
            .respond_with(track())
            .up_to_n_times(1)
            .mount(&server)
            .await;
        respond(&server, "GET", NOW_PLAYING, ResponseTemplate::new(503)).await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        sync.poll().await;
        let before = sync.state().clone();

        sync.poll().await;
        assert_eq!(sync.state(), &before);
        assert!(sync.auth().is_logged_in());
    }

    #[tokio::test]
    async fn stale_poll_is_discarded() {
        let server = MockServer::start().await;
        let mut fixture = Fixture::new(&server, Some("new"));
        let mut sync = fixture.sync();

        let playing: CurrentlyPlaying = serde_json::from_str(TRACK).unwrap();
        sync.reconcile("old", 1, Ok(NowPlaying::Playing(playing)));
        assert_eq!(sync.state().snapshot(), None);

        sync.reconcile("old", 2, Err(Error::unauthenticated("401")));
        assert!(sync.auth().is_logged_in());
    }

    #[tokio::test]
    async fn overtaken_poll_is_discarded() {
        let server = MockServer::start().await;
        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();

        let playing: CurrentlyPlaying = serde_json::from_str(TRACK).unwrap();
        sync.reconcile("token", 2, Ok(NowPlaying::Playing(playing)));
        sync.reconcile("token", 1, Ok(NowPlaying::Nothing));

        assert_eq!(sync.state().snapshot().unwrap().title, "Song");
        assert!(sync.state().is_playing());
    }

    #[tokio::test]
    async fn rejected_command_does_not_confirm() {
        let server = MockServer::start().await;
        respond(&server, "GET", NOW_PLAYING, track()).await;
        respond(
            &server,
            "POST",
            "/v1/me/player/next",
            ResponseTemplate::new(401),
        )
        .await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        sync.poll().await;
        sync.skip_next().await;

        assert!(!sync.auth().is_logged_in());
        assert_eq!(sync.confirm_at, None);
        assert_eq!(sync.state().snapshot(), None);
    }

    #[tokio::test]
    async fn seek_is_optimistic() {
        let server = MockServer::start().await;
        respond(&server, "GET", NOW_PLAYING, track()).await;
        respond(
            &server,
            "PUT",
            "/v1/me/player/seek",
            ResponseTemplate::new(500),
        )
        .await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        sync.poll().await;

        sync.seek(Duration::from_millis(120_000)).await;
        assert_eq!(sync.state().progress(), Duration::from_millis(120_000));
        assert_eq!(sync.confirm_at, None);
    }

    #[tokio::test]
    async fn seek_without_track_does_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        sync.seek(Duration::from_secs(10)).await;
        assert_eq!(sync.state().progress(), Duration::ZERO);
    }

    #[tokio::test]
    async fn pausing_twice() {
        let server = MockServer::start().await;
        respond(&server, "GET", NOW_PLAYING, track()).await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/pause"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(&server)
            .await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        sync.poll().await;

        sync.pause().await;
        sync.pause().await;

        assert!(!sync.state().is_playing());
        assert_eq!(sync.state().progress(), Duration::from_millis(50_000));
        assert!(sync.confirm_at.is_some());
    }

    #[tokio::test]
    async fn commands_need_a_token() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(204))
            .expect(0)
            .mount(&server)
            .await;

        let mut fixture = Fixture::new(&server, None);
        let mut sync = fixture.sync();
        sync.play().await;
        sync.pause().await;
        sync.skip_next().await;
        sync.skip_previous().await;
        sync.seek(Duration::from_secs(1)).await;
        sync.poll().await;

        assert_eq!(sync.confirm_at, None);
    }

    #[tokio::test]
    async fn run_requires_login() {
        let server = MockServer::start().await;
        let mut fixture = Fixture::new(&server, None);
        let mut sync = fixture.sync();

        let err = sync.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn run_stops_polling_on_rejected_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(NOW_PLAYING))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        let mut events = sync.subscribe();

        let err = sync.run(CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthenticated);
        assert_eq!(events.try_recv().unwrap(), Event::LoggedIn);
        assert_eq!(events.try_recv().unwrap(), Event::LoggedOut);
    }

    #[tokio::test]
    async fn run_polls_ticks_and_takes_commands() {
        let server = MockServer::start().await;
        respond(&server, "GET", NOW_PLAYING, track()).await;
        Mock::given(method("POST"))
            .and(path("/v1/me/player/next"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        let handle = sync.handle();
        handle.skip_next().unwrap();

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(450)).await;
            stop.cancel();
        });

        sync.run(shutdown).await.unwrap();

        // One scheduled poll plus the confirmation after skipping.
        let polls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == NOW_PLAYING)
            .count();
        assert!(polls >= 2, "expected at least two polls, got {polls}");

        let progress = sync.state().progress();
        assert!(progress >= Duration::from_millis(50_000));
        assert!(progress < Duration::from_millis(50_600));

        let published = sync.watch_state();
        assert_eq!(*published.borrow(), *sync.state());

        // Stopped loops can be restarted.
        assert_eq!(sync.confirm_at, None);
        assert!(sync.commands_rx.is_some());
    }

    #[tokio::test]
    async fn shutdown_does_not_wait_for_slow_poll() {
        let server = MockServer::start().await;
        respond(
            &server,
            "GET",
            NOW_PLAYING,
            ResponseTemplate::new(204).set_delay(Duration::from_millis(1_500)),
        )
        .await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(100)).await;
            stop.cancel();
        });

        let started = std::time::Instant::now();
        sync.run(shutdown).await.unwrap();
        assert!(
            started.elapsed() < Duration::from_millis(1_000),
            "run took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn ticking_continues_while_a_command_is_slow() {
        let server = MockServer::start().await;
        respond(&server, "GET", NOW_PLAYING, track()).await;
        respond(
            &server,
            "POST",
            "/v1/me/player/next",
            ResponseTemplate::new(204).set_delay(Duration::from_millis(2_000)),
        )
        .await;

        let mut fixture = Fixture::new(&server, Some("token"));
        let mut sync = fixture.sync();
        sync.handle().skip_next().unwrap();

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(450)).await;
            stop.cancel();
        });

        let started = std::time::Instant::now();
        sync.run(shutdown).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(1_500));

        // The skip never answered, so no confirmation poll reset progress.
        assert!(sync.state().progress() >= Duration::from_millis(50_200));
        assert_eq!(*sync.watch_state().borrow(), *sync.state());
    }
}
