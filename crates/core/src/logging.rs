//! Tracing initialization.
//!
//! [`init_tracing`] installs an `EnvFilter` (`RUST_LOG`, default `info`) and
//! either a JSON layer with nanosecond timestamps or a pretty layer for local
//! runs. A [`CredentialGuard`] layer warns whenever an event or span carries a
//! field named like a gateway credential.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize the global tracing subscriber.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(CredentialGuard::default());

    if json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(NanosecondTimer)
            .with_target(true)
            .with_thread_names(true)
            .with_span_events(FmtSpan::CLOSE);
        registry.with(json_layer).try_init()?;
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(true);
        registry.with(pretty_layer).try_init()?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct NanosecondTimer;

impl tracing_subscriber::fmt::time::FormatTime for NanosecondTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.9fZ"))
    }
}

/// Field names that must never be logged.
const CREDENTIAL_FIELDS: &[&str] = &[
    "password",
    "auth_code",
    "app_secret",
    "token",
    "secret",
];

/// Layer that flags events and spans carrying credential fields.
#[derive(Debug, Clone, Default)]
pub struct CredentialGuard {
    hits: Arc<AtomicU64>,
}

impl CredentialGuard {
    /// Number of events and spans flagged so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

impl<S> Layer<S> for CredentialGuard
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(
        &self,
        attrs: &span::Attributes<'_>,
        _id: &span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = CredentialVisitor::default();
        attrs.record(&mut visitor);
        if let Some(name) = visitor.found {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(field = name, "credential field recorded on span");
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = CredentialVisitor::default();
        event.record(&mut visitor);
        if let Some(name) = visitor.found {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(field = name, "credential field recorded on event");
        }
    }
}

#[derive(Default)]
struct CredentialVisitor {
    found: Option<&'static str>,
}

impl CredentialVisitor {
    fn check(&mut self, field: &Field) {
        if CREDENTIAL_FIELDS.contains(&field.name()) {
            self.found = Some(field.name());
        }
    }
}

impl Visit for CredentialVisitor {
    fn record_debug(&mut self, field: &Field, _value: &dyn fmt::Debug) {
        self.check(field);
    }

    fn record_str(&mut self, field: &Field, _value: &str) {
        self.check(field);
    }
}
