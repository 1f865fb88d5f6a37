//! The coordinator: owns every subsystem, brings them up in order, holds
//! the sticky error, and prints results on the way out.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use core_config::{Config, Layout};
use core_filter::BufferPool;
use core_hub::{CancelToken, DrawOptions, Hub, Latch};
use core_keymap::{JumpMap, Keymap};
use core_matcher::{ExternalMatcher, MatcherSet};
use core_source::{LineBuffer, LineProducer, MemoryBuffer, Source};
use core_terminal::Screen;
use core_view::{Styles, View, ViewModel};

use crate::error::AppError;
use crate::filter_loop;
use crate::input_loop;
use crate::query_exec::QueryExec;
use crate::sig;

/// Options resolved from the CLI over the rc-file.
#[derive(Debug, Clone)]
pub struct Options {
    pub prompt: String,
    pub layout: Layout,
    pub selection_prefix: String,
    pub sticky_selection: bool,
    pub initial_query: Option<String>,
    pub initial_index: Option<usize>,
    pub select_one: bool,
    pub print_query: bool,
    pub cancel_is_error: bool,
    pub exec: Option<String>,
    pub query_exec_delay: Duration,
}

impl Options {
    pub fn from_config(config: &Config) -> Self {
        Self {
            prompt: config.prompt.clone(),
            layout: config.layout,
            selection_prefix: config.selection_prefix.clone(),
            sticky_selection: config.sticky_selection,
            initial_query: None,
            initial_index: None,
            select_one: false,
            print_query: false,
            cancel_is_error: false,
            exec: None,
            query_exec_delay: Duration::from_millis(config.query_exec_delay_ms),
        }
    }
}

/// Incremental-refinement memo: the last uncancelled run.
pub struct FilterMemo {
    pub query: String,
    pub matcher_name: String,
    pub results: Arc<MemoryBuffer>,
}

pub struct App {
    pub hub: Arc<Hub>,
    pub source: Arc<Source>,
    pub screen: Arc<dyn Screen>,
    pub model: Arc<ViewModel>,
    pub matchers: Arc<MatcherSet>,
    pub keymap: Keymap,
    pub jump: JumpMap,
    pub options: Options,
    pub query_exec: QueryExec,
    pub pool: Arc<BufferPool>,
    styles: Styles,
    show_jump_prefix: bool,
    root: CancelToken,
    done: Latch,
    sticky_error: Mutex<Option<AppError>>,
    filter_memo: Mutex<Option<FilterMemo>>,
    pub(crate) work_cancel: Mutex<Option<CancelToken>>,
}

impl App {
    pub fn new(
        config: &Config,
        options: Options,
        initial_matcher: Option<&str>,
        source: Arc<Source>,
        screen: Arc<dyn Screen>,
        root: CancelToken,
    ) -> Result<Arc<Self>, AppError> {
        let mut matchers = MatcherSet::builtin();
        for (name, argv) in &config.custom_matcher {
            matchers.push(Arc::new(ExternalMatcher::new(name.clone(), argv.clone())));
        }
        let matchers = Arc::new(matchers);
        if let Some(name) = initial_matcher.or(config.initial_matcher.as_deref()) {
            matchers
                .select(name)
                .map_err(|err| AppError::setup("initial matcher", err.into()))?;
        }

        let mut keymap = Keymap::default_bindings();
        for (key, action) in &config.keymap {
            keymap
                .bind_spec(key, action)
                .map_err(|err| AppError::setup(format!("keymap entry {key}"), err.into()))?;
        }

        let styles =
            Styles::from_config(&config.style).map_err(|err| AppError::setup("styles", err.into()))?;
        let jump = JumpMap::new(&config.single_key_jump.alphabet);

        let model = Arc::new(ViewModel::new(
            Arc::clone(&source) as Arc<dyn LineBuffer>,
            matchers.current().name(),
        ));

        Ok(Arc::new(Self {
            hub: Arc::new(Hub::new(core_hub::DEFAULT_CAPACITY)),
            source,
            screen,
            model,
            matchers,
            keymap,
            jump,
            query_exec: QueryExec::new(options.query_exec_delay),
            options,
            pool: Arc::new(BufferPool::new(core_filter::DEFAULT_BUF_SIZE)),
            styles,
            show_jump_prefix: config.single_key_jump.show_prefix,
            root,
            done: Latch::new(),
            sticky_error: Mutex::new(None),
            filter_memo: Mutex::new(None),
            work_cancel: Mutex::new(None),
        }))
    }

    pub fn token(&self) -> &CancelToken {
        &self.root
    }

    /// Record the first error (if any), cancel the session, and release
    /// whoever is blocked in [`App::run`].
    pub fn exit(&self, err: Option<AppError>) {
        if let Some(err) = err {
            let mut sticky = self.sticky_error.lock().expect("sticky error poisoned");
            if sticky.is_none() {
                info!(target: "app", error = %err, "exit_with_error");
                *sticky = Some(err);
            }
        }
        self.query_exec.stop_timer();
        if let Some(work) = self
            .work_cancel
            .lock()
            .expect("work cancel poisoned")
            .take()
        {
            work.cancel();
        }
        self.root.cancel();
        self.done.fire();
    }

    /// Bring-up per the coordinator contract, block until exit, print.
    pub fn run(self: &Arc<Self>) -> Result<(), AppError> {
        sig::spawn(self);

        self.source.setup(&self.root, &self.hub);
        if let Err(err) = self.source.wait_ready(&self.root) {
            return match err {
                core_source::SourceError::NoInput => Err(AppError::NoInput),
                core_source::SourceError::Cancelled => {
                    // A signal beat the first line; surface its sticky error.
                    match self.sticky_error.lock().expect("sticky error poisoned").take() {
                        Some(err) => Err(err),
                        None => Err(AppError::UserCancelled {
                            error_status: self.options.cancel_is_error,
                        }),
                    }
                }
            };
        }
        debug!(target: "app", source = self.source.name(), "source_ready");

        self.screen
            .init()
            .map_err(|err| AppError::setup("screen init", err))?;

        let view = View::new(
            Arc::clone(&self.screen),
            Arc::clone(&self.hub),
            Arc::clone(&self.model),
            self.styles,
            self.options.layout,
            self.options.prompt.clone(),
            self.options.selection_prefix.clone(),
            self.jump.clone(),
            self.show_jump_prefix,
        );
        let view_handle = {
            let token = self.root.clone();
            thread::spawn(move || view.run_loop(&token))
        };
        let input_handle = {
            let app = Arc::clone(self);
            let token = self.root.clone();
            thread::spawn(move || input_loop::run(&app, &token))
        };
        let filter_handle = {
            let app = Arc::clone(self);
            let token = self.root.clone();
            thread::spawn(move || filter_loop::run(&app, &token))
        };

        if let Some(index) = self.options.initial_index {
            let size = self.model.current_buffer().size();
            self.model.location().set_total(size);
            self.model.location().set_cursor(index);
        }
        if let Some(query) = self.options.initial_query.clone() {
            self.model.query().set(&query);
            self.query_exec.exec_query(self, None);
        }
        if self.options.select_one {
            self.select_one_and_exit();
        }

        self.done.wait();
        let _ = input_handle.join();
        let _ = view_handle.join();
        let _ = filter_handle.join();
        // Leave the alternate screen before touching stdout.
        let _ = self.screen.close();

        match self.sticky_error.lock().expect("sticky error poisoned").take() {
            None => {
                self.print_results()
                    .map_err(|err| AppError::setup("print results", err.into()))?;
                Ok(())
            }
            Some(err) => Err(err),
        }
    }

    /// `--select-1`: once the scan completes, a single-line buffer is
    /// selected and the session ends immediately.
    fn select_one_and_exit(&self) {
        while !self.source.setup_done().wait_timeout(Duration::from_millis(50)) {
            if self.root.is_cancelled() {
                return;
            }
        }
        if self.source.size() == 1 {
            if let Ok(line) = self.source.line_at(0) {
                self.model.selection().add(line);
            }
            self.exit(None);
        }
    }

    /// Reset the view to the raw source: clears the refinement memo and,
    /// unless sticky selection is on, the selection.
    pub fn reset_view_to_source(&self) {
        *self.filter_memo.lock().expect("filter memo poisoned") = None;
        if !self.options.sticky_selection {
            self.model.selection().reset();
        }
        self.model
            .install_buffer(Arc::clone(&self.source) as Arc<dyn LineBuffer>);
    }

    /// Choose the pipeline source for `query`: the previous result buffer
    /// when this is a prefix refinement under the same matcher, the full
    /// source otherwise. Returns the producer and whether the incremental
    /// path was taken.
    pub fn select_source(&self, query: &str, matcher_name: &str) -> (Arc<dyn LineProducer>, bool) {
        let memo = self.filter_memo.lock().expect("filter memo poisoned");
        if let Some(memo) = &*memo {
            if memo.matcher_name == matcher_name
                && !memo.query.is_empty()
                && query.starts_with(&memo.query)
            {
                return (Arc::clone(&memo.results) as Arc<dyn LineProducer>, true);
            }
        }
        (Arc::clone(&self.source) as Arc<dyn LineProducer>, false)
    }

    /// Remember an uncancelled run for refinement.
    pub fn update_memo(&self, query: &str, matcher_name: &str, results: Arc<MemoryBuffer>) {
        *self.filter_memo.lock().expect("filter memo poisoned") = Some(FilterMemo {
            query: query.to_owned(),
            matcher_name: matcher_name.to_owned(),
            results,
        });
    }

    /// Compose the final output: an empty selection falls back to the line
    /// under the cursor, `--print-query` prefixes the query, and each
    /// selected line contributes its output half in id order.
    pub fn collect_output(&self) -> String {
        {
            let mut selection = self.model.selection();
            if selection.is_empty() {
                if let Some(line) = self.model.line_under_cursor() {
                    selection.add(line);
                }
            }
        }
        let mut payload = String::new();
        if self.options.print_query {
            payload.push_str(self.model.query().as_str());
            payload.push('\n');
        }
        self.model.selection().ascend(|line| {
            payload.push_str(line.output());
            payload.push('\n');
        });
        payload
    }

    /// Emit the final output to stdout, or pipe it to `--exec`.
    pub fn print_results(&self) -> std::io::Result<()> {
        let payload = self.collect_output();
        match &self.options.exec {
            Some(cmd) => {
                let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".into());
                let mut child = Command::new(shell)
                    .arg("-c")
                    .arg(cmd)
                    .stdin(Stdio::piped())
                    .spawn()?;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(payload.as_bytes())?;
                }
                child.wait()?;
            }
            None => {
                let mut out = std::io::stdout().lock();
                out.write_all(payload.as_bytes())?;
                out.flush()?;
            }
        }
        Ok(())
    }

    /// Redraw helper for actions that only moved the caret.
    pub fn redraw_prompt(&self) {
        let _ = self
            .hub
            .send_draw(&self.root, DrawOptions::prompt_only());
    }

    pub fn redraw(&self) {
        let _ = self.hub.send_draw(&self.root, DrawOptions::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::JoinHandle;
    use std::time::Instant;

    use core_hub::CancelToken;
    use core_line::{IdGen, Line};
    use core_matcher::{CompiledQuery, Matcher, MatcherError, SubstringMatcher};
    use core_terminal::{Event, Key, KeyCode, TestScreen};

    struct Session {
        app: Arc<App>,
        screen: Arc<TestScreen>,
        runner: JoinHandle<Result<(), AppError>>,
    }

    fn new_app(
        input: &str,
        tweak_options: impl FnOnce(&mut Options),
    ) -> (Arc<App>, Arc<TestScreen>) {
        let mut config = Config::default();
        config.query_exec_delay_ms = 0;
        let mut options = Options::from_config(&config);
        tweak_options(&mut options);
        let root = CancelToken::new();
        let source = Arc::new(Source::new(
            "test",
            Box::new(Cursor::new(input.to_owned())),
            false,
            Arc::new(IdGen::new()),
            0,
            false,
            true,
        ));
        let screen = Arc::new(TestScreen::new(40, 8));
        let app = App::new(
            &config,
            options,
            None,
            source,
            Arc::clone(&screen) as Arc<dyn core_terminal::Screen>,
            root,
        )
        .unwrap();
        (app, screen)
    }

    fn start(input: &str, tweak_options: impl FnOnce(&mut Options)) -> Session {
        let (app, screen) = new_app(input, tweak_options);
        let runner = {
            let app = Arc::clone(&app);
            thread::spawn(move || app.run())
        };
        Session {
            app,
            screen,
            runner,
        }
    }

    fn type_text(screen: &TestScreen, text: &str) {
        for ch in text.chars() {
            screen.send_event(Event::Key(Key::plain(KeyCode::Char(ch))));
        }
    }

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("timed out waiting for {what}");
    }

    fn buffer_displays(app: &App) -> Vec<String> {
        let buffer = app.model.current_buffer();
        (0..buffer.size())
            .filter_map(|i| buffer.line_at(i).ok())
            .map(|l| l.display().to_owned())
            .collect()
    }

    #[test]
    fn typing_filters_and_enter_prints_the_cursor_line() {
        let session = start("foo\nbar\nbaz\n", |_| {});
        wait_until("scan complete", || session.app.source.setup_done().is_fired());

        type_text(&session.screen, "ba");
        wait_until("two matches", || {
            buffer_displays(&session.app) == ["bar", "baz"]
        });

        session
            .screen
            .send_event(Event::Key(Key::plain(KeyCode::Enter)));
        session.runner.join().unwrap().unwrap();
        assert_eq!(session.app.collect_output(), "bar\n");
    }

    #[test]
    fn cancel_is_ignorable_unless_configured_otherwise() {
        let session = start("a\nb\n", |_| {});
        wait_until("ready", || session.app.source.ready().is_fired());
        session
            .screen
            .send_event(Event::Key(Key::plain(KeyCode::Esc)));
        let err = session.runner.join().unwrap().unwrap_err();
        assert!(err.ignorable());
        assert_eq!(err.exit_code(), 0);

        let strict = start("a\nb\n", |options| options.cancel_is_error = true);
        wait_until("ready", || strict.app.source.ready().is_fired());
        strict.screen.send_event(Event::Key(Key::plain(KeyCode::Esc)));
        let err = strict.runner.join().unwrap().unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn select_one_exits_immediately_with_the_only_line() {
        let session = start("lonely\n", |options| options.select_one = true);
        session.runner.join().unwrap().unwrap();
        assert_eq!(session.app.collect_output(), "lonely\n");
    }

    #[test]
    fn print_query_prefixes_the_output() {
        let session = start("foo\nbar\nbaz\n", |options| options.print_query = true);
        wait_until("scan complete", || session.app.source.setup_done().is_fired());
        type_text(&session.screen, "ba");
        wait_until("matches", || buffer_displays(&session.app) == ["bar", "baz"]);
        session
            .screen
            .send_event(Event::Key(Key::plain(KeyCode::Enter)));
        session.runner.join().unwrap().unwrap();
        assert_eq!(session.app.collect_output(), "ba\nbar\n");
    }

    #[test]
    fn toggled_selection_wins_over_the_cursor_fallback() {
        let session = start("foo\nbar\nbaz\n", |_| {});
        wait_until("scan complete", || session.app.source.setup_done().is_fired());
        wait_until("view installed", || {
            session.app.model.current_buffer().size() == 3
        });
        // Select "foo" and "baz" by hand, leaving the cursor on "foo".
        let buffer = session.app.model.current_buffer();
        session.app.model.selection().add(buffer.line_at(0).unwrap());
        session.app.model.selection().add(buffer.line_at(2).unwrap());
        session
            .screen
            .send_event(Event::Key(Key::plain(KeyCode::Enter)));
        session.runner.join().unwrap().unwrap();
        assert_eq!(session.app.collect_output(), "foo\nbaz\n");
    }

    #[test]
    fn empty_query_resets_view_and_selection() {
        let (app, _screen) = new_app("one\ntwo\n", |_| {});
        let filtered = Arc::new(MemoryBuffer::new());
        app.model
            .install_buffer(Arc::clone(&filtered) as Arc<dyn LineBuffer>);
        app.update_memo("on", "IgnoreCase", filtered);
        app.model
            .selection()
            .add(Arc::new(Line::new(1, "one", false, false)));

        app.reset_view_to_source();
        assert_eq!(app.model.current_buffer().size(), app.source.size());
        assert!(app.model.selection().is_empty());
        let (_, incremental) = app.select_source("on", "IgnoreCase");
        assert!(!incremental, "memo must be cleared by a reset");
    }

    #[test]
    fn sticky_selection_survives_a_reset() {
        let (app, _screen) = new_app("one\ntwo\n", |options| options.sticky_selection = true);
        app.model
            .selection()
            .add(Arc::new(Line::new(1, "one", false, false)));
        app.reset_view_to_source();
        assert_eq!(app.model.selection().len(), 1);
    }

    struct CountingMatcher {
        seen: Arc<AtomicUsize>,
    }

    struct CountingQuery {
        inner: Arc<dyn CompiledQuery>,
        seen: Arc<AtomicUsize>,
    }

    impl Matcher for CountingMatcher {
        fn name(&self) -> &str {
            "Counting"
        }

        fn query(&self, query: &str) -> Result<Arc<dyn CompiledQuery>, MatcherError> {
            Ok(Arc::new(CountingQuery {
                inner: SubstringMatcher::ignore_case().query(query)?,
                seen: Arc::clone(&self.seen),
            }))
        }
    }

    impl CompiledQuery for CountingQuery {
        fn apply_collect(
            &self,
            token: &CancelToken,
            batch: &[Arc<Line>],
        ) -> Vec<Arc<Line>> {
            self.seen.fetch_add(batch.len(), Ordering::SeqCst);
            self.inner.apply_collect(token, batch)
        }
    }

    fn run_counted(
        app: &Arc<App>,
        matcher: &CountingMatcher,
        query: &str,
    ) -> Arc<MemoryBuffer> {
        let compiled = matcher.query(query).unwrap();
        let (producer, _) = app.select_source(query, matcher.name());
        let destination = Arc::new(MemoryBuffer::new());
        let stage = core_filter::FilterStage::new(matcher, compiled, 0, Arc::clone(&app.pool));
        let pipeline = core_filter::Pipeline::new(
            producer,
            stage,
            Arc::clone(&destination),
            app.token().child(),
        );
        pipeline.run();
        app.update_memo(query, matcher.name(), Arc::clone(&destination));
        destination
    }

    #[test]
    fn refinement_filters_previous_results_not_the_source() {
        let (app, _screen) = new_app("foo\nbar\nbaz\nbanana\n", |_| {});
        app.source.setup(app.token(), &app.hub);
        wait_until("scan complete", || app.source.setup_done().is_fired());

        let seen = Arc::new(AtomicUsize::new(0));
        let matcher = CountingMatcher {
            seen: Arc::clone(&seen),
        };

        let coarse = run_counted(&app, &matcher, "ba");
        assert_eq!(seen.load(Ordering::SeqCst), 4, "first run scans the source");
        assert_eq!(coarse.size(), 3);

        let (_, incremental) = app.select_source("baz", matcher.name());
        assert!(incremental);

        seen.store(0, Ordering::SeqCst);
        let refined = run_counted(&app, &matcher, "baz");
        assert_eq!(
            seen.load(Ordering::SeqCst),
            3,
            "refinement scans the previous results"
        );
        assert_eq!(refined.size(), 1);
        assert_eq!(refined.line_at(0).unwrap().display(), "baz");
    }

    #[test]
    fn matcher_change_falls_back_to_the_full_source() {
        let (app, _screen) = new_app("a\nb\n", |_| {});
        app.update_memo("a", "IgnoreCase", Arc::new(MemoryBuffer::new()));
        let (_, incremental) = app.select_source("ab", "Regexp");
        assert!(!incremental);
        let (_, incremental) = app.select_source("zab", "IgnoreCase");
        assert!(!incremental, "prefix relation is required");
    }
}
