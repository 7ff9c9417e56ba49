// Routes card reader events into the authentication pipeline.

use crate::cipher::{AesCbcCipher, CredentialCipher};
use crate::config::{Config, CredentialSource, HandshakeConfig};
use crate::credential::encode_credential;
use crate::error::{CredentialError, SetupError};
use crate::exchange::{AuthContext, AuthOutcome, GateClient};
use crate::signing::{attachment_from_config, derive_signing_digest, SigningDigest};
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanEvent {
    pub serial_number: u64,
}

/// Everything a card reader can hand us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    TagScanned(ScanEvent),
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Authenticate(u64),
    Ignore,
}

pub fn dispatch(event: &ReaderEvent) -> Action {
    match event {
        ReaderEvent::TagScanned(scan) => Action::Authenticate(scan.serial_number),
        ReaderEvent::Other(_) => Action::Ignore,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Ignored,
    /// Another scan was still being authenticated.
    Busy,
    /// Encryption failed, so no request was sent.
    EncryptionSkipped(CredentialError),
    Completed(AuthOutcome),
    TransportFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned_at: DateTime<Local>,
    pub serial_number: Option<u64>,
    pub outcome: ScanOutcome,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    scans: AtomicU64,
    ignored: AtomicU64,
    busy: AtomicU64,
    skipped: AtomicU64,
    accepted: AtomicU64,
    denied: AtomicU64,
    transport_failures: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub scans: u64,
    pub ignored: u64,
    pub busy: u64,
    pub skipped: u64,
    pub accepted: u64,
    pub denied: u64,
    pub transport_failures: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
        }
    }
}

// Static credentials may have been issued by an earlier handshake that the
// server has since expired. A server that cannot be reached keeps them.
fn revalidate(
    client: &GateClient,
    params: &HandshakeConfig,
    context: AuthContext,
) -> Result<AuthContext, SetupError> {
    match client.check_api_key(params, &context.api_key) {
        Ok(true) => Ok(context),
        Ok(false) => {
            tracing::warn!(
                "configured api key is no longer known to the server, redoing key exchange"
            );
            client.handshake(params)
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not check configured api key, using it anyway");
            Ok(context)
        }
    }
}

/// Held for the duration of one authentication attempt.
pub(crate) struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Card scan to gate server, one scan at a time.
///
/// The context and digest are fixed at construction and only ever read, so a
/// pipeline can be shared between the reader thread and anything else behind
/// an `Arc`.
pub struct Pipeline {
    context: AuthContext,
    digest: SigningDigest,
    cipher: Box<dyn CredentialCipher>,
    client: GateClient,
    in_flight: AtomicBool,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        context: AuthContext,
        digest: SigningDigest,
        cipher: Box<dyn CredentialCipher>,
        client: GateClient,
    ) -> Self {
        Pipeline {
            context,
            digest,
            cipher,
            client,
            in_flight: AtomicBool::new(false),
            stats: PipelineStats::default(),
        }
    }

    /// Resolves credentials, derives the digest and builds the cipher. Nothing
    /// here is retried: if any step fails the reader must not be armed.
    pub fn setup(config: &Config) -> Result<Pipeline, SetupError> {
        let client = GateClient::from_config(config)?
            .with_signer(attachment_from_config(config.signature_header.as_deref())?);

        let context = match config.credential_source()? {
            CredentialSource::Static {
                api_key,
                secret_key,
            } => {
                let context = AuthContext {
                    api_key,
                    secret_key,
                };
                match &config.handshake {
                    Some(params) => revalidate(&client, params, context)?,
                    None => context,
                }
            }
            CredentialSource::Handshake(params) => client.handshake(&params)?,
        };

        let digest = derive_signing_digest(&config.shared_secret, context.secret_key)?;
        tracing::info!(digest = %digest.fingerprint(), "derived signing digest");

        let cipher = AesCbcCipher::new(&digest, config.cipher_iv.as_bytes())?;
        cipher.self_check()?;
        Ok(Pipeline::new(context, digest, Box::new(cipher), client))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn try_begin(&self) -> Option<InFlight<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| InFlight(&self.in_flight))
    }

    /// Handles one reader event. Whatever happens to this scan is reported
    /// in the return value and never unwinds into the reader.
    pub fn handle_event(&self, event: ReaderEvent) -> ScanReport {
        let scanned_at = Local::now();

        let serial_number = match dispatch(&event) {
            Action::Authenticate(serial_number) => serial_number,
            Action::Ignore => {
                tracing::info!(event = ?event, "unknown reader event, ignoring");
                PipelineStats::bump(&self.stats.ignored);
                return ScanReport {
                    scanned_at,
                    serial_number: None,
                    outcome: ScanOutcome::Ignored,
                };
            }
        };

        PipelineStats::bump(&self.stats.scans);
        tracing::info!(serial_number, "tag scanned");

        let outcome = match self.try_begin() {
            Some(_in_flight) => self.authenticate(serial_number),
            None => {
                tracing::warn!(serial_number, "previous scan still in flight, dropping this one");
                PipelineStats::bump(&self.stats.busy);
                ScanOutcome::Busy
            }
        };

        ScanReport {
            scanned_at,
            serial_number: Some(serial_number),
            outcome,
        }
    }

    fn authenticate(&self, serial_number: u64) -> ScanOutcome {
        let envelope = match encode_credential(serial_number, self.cipher.as_ref()) {
            Ok(envelope) => envelope,
            Err(e) => {
                // No request goes out with an empty body
                tracing::error!(serial_number, error = %e, "skipping scan");
                PipelineStats::bump(&self.stats.skipped);
                return ScanOutcome::EncryptionSkipped(e);
            }
        };

        match self
            .client
            .authenticate(&self.context, &self.digest, &envelope)
        {
            Ok(outcome) => {
                if outcome.is_success() {
                    tracing::info!(serial_number, status = outcome.status, "gate accepted card");
                    PipelineStats::bump(&self.stats.accepted);
                } else {
                    tracing::warn!(
                        serial_number,
                        status = outcome.status,
                        reason = outcome.body.as_deref().unwrap_or_default(),
                        "gate rejected card"
                    );
                    PipelineStats::bump(&self.stats.denied);
                }
                if outcome.issued_api_key.is_some() {
                    tracing::info!("gate server sent back an api key header");
                }
                ScanOutcome::Completed(outcome)
            }
            Err(e) => {
                tracing::error!(serial_number, error = %e, "auth request failed");
                PipelineStats::bump(&self.stats.transport_failures);
                ScanOutcome::TransportFailed(e.to_string())
            }
        }
    }
}
