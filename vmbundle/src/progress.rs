use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;
use vmbundle_cmd::{Command, CommandError, CommandOutput, Executor};

const TICK_STRINGS: &[&str] = &[
    "▹▹▹▹▹",
    "▸▹▹▹▹",
    "▹▸▹▹▹",
    "▹▹▸▹▹",
    "▹▹▹▸▹",
    "▹▹▹▹▸",
    "▪▪▪▪▪",
];

/// Draws a spinner, labelled with the command line, while the inner executor
/// runs a command. Spinners live in `progress`, so log lines written through
/// a [`SpinnerAwareWriter`] on the same `MultiProgress` do not tear them.
pub struct SpinnerExecutor<E> {
    inner: E,
    progress: MultiProgress,
    style: ProgressStyle,
}

impl<E: Executor> SpinnerExecutor<E> {
    pub fn new(inner: E, progress: MultiProgress) -> Self {
        let style = ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICK_STRINGS);
        Self {
            inner,
            progress,
            style,
        }
    }

    fn spinner(&self, command: &Command) -> ProgressBar {
        let spinner = self.progress.add(ProgressBar::new_spinner());
        spinner.set_style(self.style.clone());
        spinner.set_message(command.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}

#[async_trait]
impl<E: Executor> Executor for SpinnerExecutor<E> {
    async fn output(&self, command: &Command) -> Result<CommandOutput, CommandError> {
        let spinner = self.spinner(command);
        let result = self.inner.output(command).await;
        spinner.finish_and_clear();
        self.progress.remove(&spinner);
        result
    }
}

/// Log writer that hides any active spinner while a line is written.
#[derive(Debug, Clone)]
pub struct SpinnerAwareWriter<M> {
    progress: MultiProgress,
    inner: M,
}

impl<M> SpinnerAwareWriter<M> {
    pub fn new(progress: MultiProgress, inner: M) -> Self {
        Self { progress, inner }
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for SpinnerAwareWriter<M> {
    type Writer = Suspended<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Suspended {
            progress: self.progress.clone(),
            inner: self.inner.make_writer(),
        }
    }
}

pub struct Suspended<W> {
    progress: MultiProgress,
    inner: W,
}

impl<W: io::Write> io::Write for Suspended<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let inner = &mut self.inner;
        self.progress.suspend(|| inner.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
