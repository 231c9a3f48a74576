use std::env;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use mailparse::{MailAddr, MailHeaderMap, ParsedMail, parse_mail};
use scraper::Html;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::ai::TextModel;
use crate::db::Database;
use crate::error::PipelineError;
use crate::pipeline::{self, IngestOutcome};

type Result<T> = std::result::Result<T, PipelineError>;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

// Bound on concurrent per-message tasks, so a large unseen batch does not
// burst the extraction API. A slow extraction never blocks the rest of the
// batch; it only holds one permit.
pub const MAX_CONCURRENT_MESSAGES: usize = 4;

const IO_TIMEOUT: Duration = Duration::from_secs(30);

// --- Message parsing ---

/// Normalized inbound message; lives only within one ingestion pass.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub sender: String,
    pub subject: String,
    pub body: String,
}

/// Decodes raw mail bytes into a normalized message. Sender comes from the
/// From address (lowercased); the body prefers text/plain, falling back to
/// HTML flattened to text.
pub fn parse_message(raw: &[u8]) -> Result<InboundMessage> {
    let parsed =
        parse_mail(raw).map_err(|e| PipelineError::Parse(format!("invalid mail structure: {e}")))?;

    let from_raw = parsed
        .headers
        .get_first_value("From")
        .ok_or_else(|| PipelineError::Parse("missing From header".to_string()))?;
    let sender = first_address(&from_raw)
        .ok_or_else(|| PipelineError::Parse(format!("unparseable From header: {from_raw}")))?;

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let body = message_body(&parsed)?;

    Ok(InboundMessage {
        sender,
        subject,
        body,
    })
}

fn first_address(from_raw: &str) -> Option<String> {
    let list = mailparse::addrparse(from_raw).ok()?;
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => return Some(info.addr.to_lowercase()),
            MailAddr::Group(group) => {
                if let Some(info) = group.addrs.first() {
                    return Some(info.addr.to_lowercase());
                }
            }
        }
    }
    None
}

fn message_body(parsed: &ParsedMail) -> Result<String> {
    if let Some(part) = find_part(parsed, "text/plain") {
        return part
            .get_body()
            .map_err(|e| PipelineError::Parse(format!("undecodable text body: {e}")));
    }
    if let Some(part) = find_part(parsed, "text/html") {
        let html = part
            .get_body()
            .map_err(|e| PipelineError::Parse(format!("undecodable html body: {e}")))?;
        return Ok(html_to_text(&html));
    }
    Err(PipelineError::Parse("no readable body part".to_string()))
}

fn find_part<'a, 'b>(part: &'a ParsedMail<'b>, mime: &str) -> Option<&'a ParsedMail<'b>> {
    if part.ctype.mimetype.eq_ignore_ascii_case(mime) {
        return Some(part);
    }
    part.subparts.iter().find_map(|sub| find_part(sub, mime))
}

fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// --- Mailbox configuration ---

#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl MailboxConfig {
    /// Reads IMAP credentials from the environment. `None` means ingestion
    /// is disabled for this run, not that something went wrong.
    pub fn from_env() -> Option<Self> {
        let username = env::var("IMAP_USER").ok()?;
        let password = env::var("IMAP_PASSWORD").ok()?;
        let host = env::var("IMAP_HOST").unwrap_or_else(|_| "imap.gmail.com".to_string());
        let port = env::var("IMAP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(993);
        Some(Self {
            host,
            port,
            username,
            password: password.trim().to_string(),
        })
    }
}

// --- Mailbox watcher ---

type ImapSession = imap::Session<native_tls::TlsStream<TcpStream>>;

// The connection handle lives inside the watcher loop, so connect and poll
// can never run concurrently on it.
enum Mailbox {
    Disconnected,
    Ready(ImapSession),
}

/// Cycle totals reported after each poll.
#[derive(Debug, Default)]
pub struct CycleStats {
    pub fetched: usize,
    pub recorded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct MailboxWatcher {
    config: MailboxConfig,
    db: Arc<Database>,
    model: Arc<dyn TextModel>,
    limit: Arc<Semaphore>,
}

impl MailboxWatcher {
    pub fn new(config: MailboxConfig, db: Arc<Database>, model: Arc<dyn TextModel>) -> Self {
        Self {
            config,
            db,
            model,
            limit: Arc::new(Semaphore::new(MAX_CONCURRENT_MESSAGES)),
        }
    }

    /// Runs the watcher forever. The first poll happens immediately, then
    /// every five minutes on a timer independent of poll duration. Any
    /// connection or poll failure drops back to disconnected and is retried
    /// from scratch on the next tick; there is no backoff and no retry cap.
    pub async fn run(self) {
        let mut timer = tokio::time::interval(POLL_INTERVAL);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut state = Mailbox::Disconnected;
        loop {
            timer.tick().await;
            state = self.tick(state).await;
        }
    }

    async fn tick(&self, state: Mailbox) -> Mailbox {
        let session = match state {
            Mailbox::Ready(session) => session,
            Mailbox::Disconnected => match connect(self.config.clone()).await {
                Ok(session) => {
                    info!(host = %self.config.host, user = %self.config.username, "mailbox connection ready");
                    session
                }
                Err(e) => {
                    warn!(error = %e, "mailbox connection failed; retrying on next tick");
                    return Mailbox::Disconnected;
                }
            },
        };

        match fetch_unseen(session).await {
            Ok((session, batch)) => {
                if batch.is_empty() {
                    debug!("no new messages");
                } else {
                    info!(messages = batch.len(), "fetched unseen messages");
                    self.dispatch(batch);
                }
                Mailbox::Ready(session)
            }
            Err(e) => {
                warn!(error = %e, "poll cycle failed; dropping connection");
                Mailbox::Disconnected
            }
        }
    }

    // Fans the batch out as independent tasks and hands the completion
    // channel to a detached collector, so the timer stays independent of
    // per-message work. A failed message never aborts the cycle.
    fn dispatch(&self, batch: Vec<Vec<u8>>) {
        let fetched = batch.len();
        let mut rx = self.spawn_workers(batch);
        tokio::spawn(async move {
            let stats = collect(fetched, &mut rx).await;
            info!(
                fetched = stats.fetched,
                recorded = stats.recorded,
                skipped = stats.skipped,
                failed = stats.failed,
                "ingestion cycle complete"
            );
        });
    }

    fn spawn_workers(&self, batch: Vec<Vec<u8>>) -> mpsc::Receiver<Result<IngestOutcome>> {
        let (tx, rx) = mpsc::channel(batch.len().max(1));
        for raw in batch {
            let db = Arc::clone(&self.db);
            let model = Arc::clone(&self.model);
            let limit = Arc::clone(&self.limit);
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(_permit) = limit.acquire_owned().await else {
                    return;
                };
                let outcome = pipeline::ingest_message(&db, model.as_ref(), &raw).await;
                let _ = tx.send(outcome).await;
            });
        }
        rx
    }

    /// One foreground poll cycle: connect, fetch, process everything, report.
    pub async fn poll_once(&self) -> Result<CycleStats> {
        let session = connect(self.config.clone()).await?;
        let (session, batch) = fetch_unseen(session).await?;
        logout(session).await;

        let fetched = batch.len();
        let mut rx = self.spawn_workers(batch);
        Ok(collect(fetched, &mut rx).await)
    }
}

async fn collect(fetched: usize, rx: &mut mpsc::Receiver<Result<IngestOutcome>>) -> CycleStats {
    let mut stats = CycleStats {
        fetched,
        ..Default::default()
    };
    while let Some(result) = rx.recv().await {
        match result {
            Ok(IngestOutcome::Recorded { proposal_id, .. }) => {
                debug!(proposal = proposal_id, "message recorded");
                stats.recorded += 1;
            }
            Ok(IngestOutcome::UnknownVendor { sender }) => {
                info!(sender, "message dropped: sender is not a known vendor");
                stats.skipped += 1;
            }
            Ok(IngestOutcome::UnmatchedRfp { sender, subject }) => {
                info!(sender, subject, "message dropped: no RFP matched");
                stats.skipped += 1;
            }
            Err(e) => {
                error!(error = %e, "message processing failed");
                stats.failed += 1;
            }
        }
    }
    stats
}

async fn connect(config: MailboxConfig) -> Result<ImapSession> {
    tokio::task::spawn_blocking(move || connect_blocking(&config))
        .await
        .map_err(|e| PipelineError::Connection(format!("connect task panicked: {e}")))?
}

fn connect_blocking(config: &MailboxConfig) -> Result<ImapSession> {
    let conn_err = |e: &dyn std::fmt::Display| PipelineError::Connection(e.to_string());

    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| conn_err(&e))?;
    let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
        PipelineError::Connection(format!("cannot reach {}:{}: {e}", config.host, config.port))
    })?;
    tcp.set_read_timeout(Some(IO_TIMEOUT)).map_err(|e| conn_err(&e))?;
    tcp.set_write_timeout(Some(IO_TIMEOUT)).map_err(|e| conn_err(&e))?;
    let tls_stream = tls.connect(&config.host, tcp).map_err(|e| conn_err(&e))?;

    let client = imap::Client::new(tls_stream);
    let session = client
        .login(&config.username, &config.password)
        .map_err(|e| PipelineError::Connection(format!("login failed: {}", e.0)))?;
    Ok(session)
}

async fn fetch_unseen(session: ImapSession) -> Result<(ImapSession, Vec<Vec<u8>>)> {
    let (session, result) = tokio::task::spawn_blocking(move || {
        let mut session = session;
        let result = fetch_unseen_blocking(&mut session);
        (session, result)
    })
    .await
    .map_err(|e| PipelineError::Connection(format!("poll task panicked: {e}")))?;
    Ok((session, result?))
}

fn fetch_unseen_blocking(session: &mut ImapSession) -> Result<Vec<Vec<u8>>> {
    session
        .select("INBOX")
        .map_err(|e| PipelineError::Connection(format!("cannot open inbox: {e}")))?;

    let mut ids: Vec<u32> = session
        .search("UNSEEN")
        .map_err(|e| PipelineError::Connection(format!("unseen search failed: {e}")))?
        .into_iter()
        .collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    ids.sort_unstable();

    let set = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");

    // RFC822 fetch (no PEEK) marks the messages seen, so each message is
    // handed off exactly once even when cycles overlap.
    let messages = session
        .fetch(set, "RFC822")
        .map_err(|e| PipelineError::Connection(format!("fetch failed: {e}")))?;
    Ok(messages
        .iter()
        .filter_map(|m| m.body().map(|b| b.to_vec()))
        .collect())
}

async fn logout(session: ImapSession) {
    let _ = tokio::task::spawn_blocking(move || {
        let mut session = session;
        session.logout()
    })
    .await;
}
