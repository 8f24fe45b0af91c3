//! services/api/src/cli/import.rs
//!
//! The `import` command: log in, pick a book and turn it into
//! `<title>.pdf` in the working directory.

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use edubase_core::auth::LoginMode;
use edubase_core::config::EdubaseConfig;
use edubase_core::domain::{Book, BookId, Credentials};
use edubase_core::filename::sanitize_filename;
use edubase_core::library::LibraryLister;
use edubase_core::orchestrator::{DownloadOrchestrator, DownloadOutcome, DownloadPlan, ProgressSink, ProgressUpdate};
use edubase_core::ports::{BrowserLauncher, LaunchOptions, PageDriver, PdfAssembler};
use edubase_core::validation::{parse_max_pages, ValidationError};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ApiError;

/// Below this the pagination indicator may not render.
pub const MIN_RECOMMENDED_WIDTH: u32 = 1920;
pub const MIN_RECOMMENDED_HEIGHT: u32 = 1080;

#[derive(Debug, Clone, Args)]
pub struct ImportArgs {
    /// Edubase account email
    #[arg(short, long, env = "EDUBASE_EMAIL", requires = "password")]
    pub email: Option<String>,

    /// Edubase account password
    #[arg(short, long, env = "EDUBASE_PASSWORD", hide_env_values = true, requires = "email")]
    pub password: Option<String>,

    /// Directory for page screenshots
    #[arg(short = 't', long = "temp", default_value = "screenshots")]
    pub temp: PathBuf,

    /// Pages to download, -1 for all
    #[arg(short = 'm', long, default_value_t = -1, allow_negative_numbers = true)]
    pub max_pages: i64,

    /// First page to download
    #[arg(short = 's', long, default_value_t = 1, allow_negative_numbers = true)]
    pub start_page: i64,

    /// Re-capture pages that already have a screenshot
    #[arg(short = 'o', long)]
    pub img_overwrite: bool,

    /// Show the browser window
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Log in by hand in the browser window
    #[arg(short = 'M', long)]
    pub manual: bool,

    /// Browser viewport width
    #[arg(short = 'W', long, default_value_t = 1920)]
    pub width: u32,

    /// Browser viewport height
    #[arg(short = 'H', long, default_value_t = 1080)]
    pub height: u32,

    /// Settle delay before each screenshot
    #[arg(short = 'D', long, default_value = "500ms", value_parser = humantime::parse_duration)]
    pub page_delay: Duration,

    /// Browser launch and request timeout
    #[arg(short = 'T', long, default_value = "5m", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Book to download; skips the interactive selection
    #[arg(short = 'b', long, allow_negative_numbers = true)]
    pub book_id: Option<i64>,
}

//=========================================================================================
// Command
//=========================================================================================

/// Runs the import with the real browser and PDF writer on stdin/stdout.
pub async fn run_import(
    args: ImportArgs,
    config: &Config,
    launcher: &dyn BrowserLauncher,
    assembler: Arc<dyn PdfAssembler>,
) -> Result<DownloadOutcome, ApiError> {
    let mut prompter = Prompter::stdin();
    Import::new(args, config, assembler)?
        .run(launcher, &mut prompter, &PathBuf::from("."))
        .await
}

/// One import, with its inputs checked.
pub struct Import {
    args: ImportArgs,
    edubase: Arc<EdubaseConfig>,
    assembler: Arc<dyn PdfAssembler>,
    executable: Option<PathBuf>,
    start_page: u32,
    max_pages: Option<u32>,
}

impl Import {
    /// Checks the page flags before anything is launched.
    pub fn new(args: ImportArgs, config: &Config, assembler: Arc<dyn PdfAssembler>) -> Result<Self, ApiError> {
        let start_page = u32::try_from(args.start_page)
            .ok()
            .filter(|p| *p > 0)
            .ok_or(ValidationError::InvalidStartPage)?;
        let max_pages = parse_max_pages(args.max_pages)?;
        if let Some(raw) = args.book_id {
            BookId::new(raw).ok_or(ValidationError::InvalidBookId)?;
        }

        let edubase = Arc::new(
            EdubaseConfig::default()
                .with_base_url(config.base_url.clone())
                .with_page_delay(args.page_delay),
        );
        Ok(Self {
            executable: config.chrome_executable.clone(),
            args,
            edubase,
            assembler,
            start_page,
            max_pages,
        })
    }

    /// Overrides the protocol timings, e.g. to run without delays.
    pub fn with_edubase_config(mut self, edubase: EdubaseConfig) -> Self {
        self.edubase = Arc::new(edubase);
        self
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            headless: !self.args.debug && !self.args.manual,
            width: self.args.width,
            height: self.args.height,
            timeout: self.args.timeout,
            executable: self.executable.clone(),
        }
    }

    /// Logs in, selects the book and downloads it into `output_dir`. The browser
    /// is closed whatever happens.
    pub async fn run<R>(
        &self,
        launcher: &dyn BrowserLauncher,
        prompter: &mut Prompter<R>,
        output_dir: &std::path::Path,
    ) -> Result<DownloadOutcome, ApiError>
    where
        R: AsyncBufRead + Unpin,
    {
        if let Some(warning) = resolution_warning(self.args.width, self.args.height) {
            warn!("{}", warning);
        }

        let mode = self.login_mode(prompter).await?;
        if matches!(mode, LoginMode::Manual) {
            println!("Manual login selected. Please complete the login in the opened browser window...");
        }

        let driver = launcher.launch(&self.launch_options()).await?;
        let result = self.run_with(driver.as_ref(), &mode, prompter, output_dir).await;
        if let Err(e) = driver.close().await {
            warn!("Failed to close the browser: {}", e);
        }
        result
    }

    async fn run_with<R>(
        &self,
        driver: &dyn PageDriver,
        mode: &LoginMode,
        prompter: &mut Prompter<R>,
        output_dir: &std::path::Path,
    ) -> Result<DownloadOutcome, ApiError>
    where
        R: AsyncBufRead + Unpin,
    {
        let orchestrator = DownloadOrchestrator::new(self.edubase.clone(), self.assembler.clone());
        let progress = CliProgress::new();

        orchestrator.authenticate(driver, mode, &progress).await?;

        let books = LibraryLister::new(driver, &self.edubase).get_books().await?;
        let book = match self.args.book_id.and_then(BookId::new) {
            Some(id) => books
                .into_iter()
                .find(|b| b.id == id)
                .unwrap_or_else(|| Book {
                    id,
                    title: format!("book_{}", id),
                }),
            None => {
                if books.is_empty() {
                    return Err(ApiError::Usage("Your library has no books".to_string()));
                }
                println!("Books in your library:");
                for (index, book) in books.iter().enumerate() {
                    println!("  {:>3}) {}", index + 1, book.title);
                }
                let answer = prompter.ask("Book number: ").await?;
                select_book(&books, &answer)?.clone()
            }
        };
        info!("Selected {}", book);

        let plan = DownloadPlan {
            start_page: self.start_page,
            max_pages: self.max_pages,
            overwrite: self.args.img_overwrite,
            ..DownloadPlan::new(
                book.id,
                self.args.temp.clone(),
                output_path(output_dir, &book.title),
            )
        };
        let outcome = orchestrator.download(driver, &plan, &progress).await?;
        println!(
            "Saved {} pages of \"{}\" to {}",
            outcome.pages,
            book.title,
            outcome.pdf_path.display()
        );
        Ok(outcome)
    }

    async fn login_mode<R>(&self, prompter: &mut Prompter<R>) -> Result<LoginMode, ApiError>
    where
        R: AsyncBufRead + Unpin,
    {
        if self.args.manual {
            return Ok(LoginMode::Manual);
        }
        let email = match &self.args.email {
            Some(email) => email.clone(),
            None => prompter.ask("Email: ").await?,
        };
        let password = match &self.args.password {
            Some(password) => password.clone(),
            None => prompter.ask_secret("Password: ").await?,
        };
        let credentials = Credentials::new(email.trim(), password);
        if credentials.email.is_empty() {
            return Err(ValidationError::EmailRequired.into());
        }
        if credentials.password.is_empty() {
            return Err(ValidationError::PasswordRequired.into());
        }
        Ok(LoginMode::Credentials(credentials))
    }
}

//=========================================================================================
// Helpers
//=========================================================================================

/// `{dir}/{sanitized title}.pdf`
pub fn output_path(dir: &std::path::Path, title: &str) -> PathBuf {
    dir.join(format!("{}.pdf", sanitize_filename(title)))
}

pub fn resolution_warning(width: u32, height: u32) -> Option<String> {
    if width >= MIN_RECOMMENDED_WIDTH && height >= MIN_RECOMMENDED_HEIGHT {
        return None;
    }
    Some(format!(
        "WARNING: Screen resolution {}x{} is below the recommended minimum of {}x{}. \
         The page count may not be detected. Use -W {} -H {}.",
        width,
        height,
        MIN_RECOMMENDED_WIDTH,
        MIN_RECOMMENDED_HEIGHT,
        MIN_RECOMMENDED_WIDTH,
        MIN_RECOMMENDED_HEIGHT
    ))
}

/// Maps a 1-based answer to a listed book.
pub fn select_book<'a>(books: &'a [Book], answer: &str) -> Result<&'a Book, ApiError> {
    answer
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|index| books.get(index))
        .ok_or_else(|| {
            ApiError::Usage(format!(
                "'{}' is not a book number between 1 and {}",
                answer.trim(),
                books.len()
            ))
        })
}

/// Reads a secret without echoing it.
pub type SecretReader = fn(&str) -> std::io::Result<String>;

/// Line-based questions on a terminal (or any reader in tests).
pub struct Prompter<R> {
    lines: Lines<R>,
    secret_reader: Option<SecretReader>,
}

impl Prompter<BufReader<Stdin>> {
    /// Prompts on stdin. Secrets are read with echo off when stdin is a terminal.
    pub fn stdin() -> Self {
        let prompter = Self::new(BufReader::new(tokio::io::stdin()));
        if std::io::stdin().is_terminal() {
            prompter.with_secret_reader(|question| rpassword::prompt_password(question))
        } else {
            prompter
        }
    }
}

impl<R: AsyncBufRead + Unpin> Prompter<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            secret_reader: None,
        }
    }

    pub fn with_secret_reader(mut self, reader: SecretReader) -> Self {
        self.secret_reader = Some(reader);
        self
    }

    /// Like [`Prompter::ask`], but the answer is not echoed. Without a secret
    /// reader the answer is a plain line from the input.
    pub async fn ask_secret(&mut self, question: &str) -> Result<String, ApiError> {
        let Some(read) = self.secret_reader else {
            return self.ask(question).await;
        };
        let question = question.to_string();
        let answer = tokio::task::spawn_blocking(move || read(&question))
            .await
            .map_err(|e| ApiError::Internal(format!("password prompt failed: {}", e)))??;
        Ok(answer.trim_end_matches(['\r', '\n']).to_string())
    }

    pub async fn ask(&mut self, question: &str) -> Result<String, ApiError> {
        print!("{}", question);
        std::io::stdout().flush()?;
        let answer = self
            .lines
            .next_line()
            .await?
            .ok_or_else(|| ApiError::Usage("No input on stdin".to_string()))?;
        Ok(answer.trim().to_string())
    }
}

/// Progress bar for capture, then for PDF assembly.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        Self { bar }
    }
}

impl ProgressSink for CliProgress {
    fn update(&self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::LoggingIn => self.bar.set_message("logging in..."),
            ProgressUpdate::LoggedIn => self.bar.set_message("logged in"),
            ProgressUpdate::BookOpened { pages, .. } => {
                self.bar.set_length(u64::from(pages));
                self.bar.set_position(0);
                self.bar.set_message("capturing pages");
            }
            ProgressUpdate::PageCaptured { done, .. } => self.bar.set_position(u64::from(done)),
            ProgressUpdate::PageAppended { done, .. } => {
                if done == 1 {
                    self.bar.set_message("building PDF");
                }
                self.bar.set_position(u64::from(done));
            }
            ProgressUpdate::Validated { pages } => {
                self.bar.finish_with_message(format!("{} pages", pages));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use edubase_core::testing::{CountingAssembler, ScriptedLauncher, ScriptedPage};

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        import: ImportArgs,
    }

    fn args(extra: &[&str]) -> ImportArgs {
        let mut argv = vec!["import"];
        argv.extend_from_slice(extra);
        TestCli::parse_from(argv).import
    }

    fn credentials() -> Credentials {
        Credentials::new("reader@example.com", "secret")
    }

    fn import(extra: &[&str], temp: &std::path::Path) -> Import {
        let mut argv = vec!["-t", temp.to_str().unwrap()];
        argv.extend_from_slice(extra);
        Import::new(args(&argv), &Config::default(), Arc::new(CountingAssembler::new()))
            .unwrap()
            .with_edubase_config(EdubaseConfig::immediate())
    }

    #[test]
    fn defaults_match_the_documented_flags() {
        let args = args(&[]);
        assert_eq!(args.temp, PathBuf::from("screenshots"));
        assert_eq!(args.max_pages, -1);
        assert_eq!(args.start_page, 1);
        assert_eq!((args.width, args.height), (1920, 1080));
        assert_eq!(args.page_delay, Duration::from_millis(500));
        assert_eq!(args.timeout, Duration::from_secs(300));
        assert!(args.book_id.is_none());
    }

    #[test]
    fn short_flags_parse() {
        let args = args(&[
            "-m", "5", "-s", "3", "-o", "-d", "-W", "2560", "-H", "1440", "-D", "1s", "-b", "58216",
        ]);
        assert_eq!(args.max_pages, 5);
        assert_eq!(args.start_page, 3);
        assert!(args.img_overwrite && args.debug);
        assert_eq!((args.width, args.height), (2560, 1440));
        assert_eq!(args.page_delay, Duration::from_secs(1));
        assert_eq!(args.book_id, Some(58216));
    }

    #[test]
    fn invalid_page_flags_are_rejected_up_front() {
        let err = Import::new(args(&["-m", "0"]), &Config::default(), Arc::new(CountingAssembler::new()))
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "Invalid request: max_pages must be -1 (all pages) or a positive integer"
        );
        assert!(Import::new(args(&["-s", "0"]), &Config::default(), Arc::new(CountingAssembler::new())).is_err());
        assert!(Import::new(args(&["-b", "-4"]), &Config::default(), Arc::new(CountingAssembler::new())).is_err());
    }

    #[test]
    fn low_resolutions_are_flagged() {
        assert!(resolution_warning(1920, 1080).is_none());
        assert!(resolution_warning(2560, 1440).is_none());
        let warning = resolution_warning(1280, 720).unwrap();
        assert!(warning.contains("1280x720"));
        assert!(warning.contains("-W 1920 -H 1080"));
    }

    #[test]
    fn books_are_selected_by_number() {
        let books = vec![
            Book { id: BookId::new(1).unwrap(), title: "Alpha".into() },
            Book { id: BookId::new(2).unwrap(), title: "Beta".into() },
        ];
        assert_eq!(select_book(&books, " 2 ").unwrap().title, "Beta");
        assert!(select_book(&books, "0").is_err());
        assert!(select_book(&books, "3").is_err());
        assert!(select_book(&books, "two").is_err());
    }

    #[test]
    fn output_is_named_after_the_sanitized_title() {
        let path = output_path(std::path::Path::new("out"), "Physik: Band 1/2");
        assert_eq!(path, PathBuf::from("out/Physik_ Band 1_2.pdf"));
    }

    #[tokio::test]
    async fn imports_the_selected_book() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ScriptedLauncher::new(
            ScriptedPage::builder()
                .accept(credentials())
                .book("111", "First")
                .book("222", "Second: Part/2")
                .pages(3),
        );
        let import = import(&["-e", "reader@example.com", "-p", "secret"], &dir.path().join("shots"));
        let mut prompter = Prompter::new(&b"2\n"[..]);

        let outcome = import.run(&launcher, &mut prompter, dir.path()).await.unwrap();

        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.pdf_path, dir.path().join("Second_ Part_2.pdf"));
        let page = launcher.last_page().unwrap();
        assert_eq!(page.captured_pages(), vec![1, 2, 3]);
        assert!(page.is_closed());
    }

    #[tokio::test]
    async fn prompts_for_missing_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ScriptedLauncher::new(
            ScriptedPage::builder().accept(credentials()).book("7", "Only").pages(1),
        );
        let import = import(&["-b", "7"], &dir.path().join("shots"));
        let mut prompter = Prompter::new(&b"reader@example.com\nsecret\n"[..]);

        let outcome = import.run(&launcher, &mut prompter, dir.path()).await.unwrap();
        assert_eq!(outcome.pdf_path, dir.path().join("Only.pdf"));
    }

    #[tokio::test]
    async fn password_prompt_uses_the_secret_reader() {
        let dir = tempfile::tempdir().unwrap();
        let import = import(&[], &dir.path().join("shots"));
        let mut prompter = Prompter::new(&b"reader@example.com\nnot-this-line\n"[..])
            .with_secret_reader(|question| {
                assert_eq!(question, "Password: ");
                Ok("secret\n".to_string())
            });

        let mode = import.login_mode(&mut prompter).await.unwrap();

        match mode {
            LoginMode::Credentials(c) => assert_eq!(c, credentials()),
            LoginMode::Manual => panic!("expected credentials"),
        }
        assert_eq!(prompter.ask("Next: ").await.unwrap(), "not-this-line");
    }

    #[tokio::test]
    async fn rejected_credentials_close_the_browser() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ScriptedLauncher::new(ScriptedPage::builder().accept(credentials()).pages(1));
        let import = import(&["-e", "reader@example.com", "-p", "wrong", "-b", "7"], &dir.path().join("shots"));
        let mut prompter = Prompter::new(&b""[..]);

        let err = import.run(&launcher, &mut prompter, dir.path()).await.unwrap_err();

        assert!(err.to_string().contains("authentication failed"), "{err}");
        assert!(launcher.last_page().unwrap().is_closed());
    }

    #[tokio::test]
    async fn manual_login_shows_the_browser() {
        let dir = tempfile::tempdir().unwrap();
        let import = import(&["-M"], &dir.path().join("shots"));
        assert!(!import.launch_options().headless);
        let mut prompter = Prompter::new(&b""[..]);
        let mode = import.login_mode(&mut prompter).await.unwrap();
        assert!(matches!(mode, LoginMode::Manual));
    }
}
