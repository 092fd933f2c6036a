//! Scripted sign-in through the relay.
//!
//! Demonstrates:
//! - Building a Negotiator with in-memory collaborators
//! - Requesting an assertion from a relying party page with a Caller
//! - Driving the dialog with commands as the screens arrive
//!
//! Usage:
//!   cargo run --example sign_in
//!   cargo run --example sign_in -- --debug
//!   cargo run --example sign_in -- --direct

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use identity_negotiator::{
    AccountService, AddressInfo, AddressInfoLookup, Assertion, AssertionIssuer, AssertionRequest,
    BrowsingContext, Caller, CallerConfig, CollaboratorResult, Command, KeyGenError, KeyPair,
    KeyPairGenerator, Negotiator, NegotiatorConfig, RelayStrategy, Result, Screen, SecretKey,
    Surface,
};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;
use url::Url;

// ============================================================================
// Constants
// ============================================================================

const IDP: &str = "https://login.example";
const EMAIL: &str = "known.user@rp.example";
const PASSWORD: &str = "hunter2hunter2";

// ============================================================================
// Collaborators
// ============================================================================

struct DemoBackend;

#[async_trait]
impl AddressInfoLookup for DemoBackend {
    async fn address_info(&self, email: &str) -> CollaboratorResult<AddressInfo> {
        Ok(AddressInfo::secondary(email == EMAIL))
    }
}

#[async_trait]
impl AssertionIssuer for DemoBackend {
    async fn issue(&self, request: AssertionRequest) -> CollaboratorResult<Option<Assertion>> {
        Ok(Some(Assertion::new(format!(
            "{}~{}",
            request.email, request.audience
        ))))
    }
}

#[async_trait]
impl AccountService for DemoBackend {
    async fn list_emails(&self) -> CollaboratorResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn authenticate(&self, email: &str, password: &str) -> CollaboratorResult<bool> {
        Ok(email == EMAIL && password == PASSWORD)
    }

    async fn create_user(&self, _email: &str, _password: &str) -> CollaboratorResult<()> {
        Ok(())
    }

    async fn add_email(&self, _email: &str) -> CollaboratorResult<()> {
        Ok(())
    }

    async fn request_password_reset(&self, _email: &str) -> CollaboratorResult<()> {
        Ok(())
    }
}

#[async_trait]
impl KeyPairGenerator for DemoBackend {
    async fn generate(&self) -> std::result::Result<KeyPair, KeyGenError> {
        Ok(KeyPair::new("demo-public-key", SecretKey::new(vec![0u8; 32])))
    }
}

/// Prints screens and forwards them to the script.
struct ConsoleSurface {
    screens: mpsc::UnboundedSender<Screen>,
}

impl Surface for ConsoleSurface {
    fn render(&self, screen: &Screen) {
        println!("  [screen] {screen:?}");
        let _ = self.screens.send(screen.clone());
    }

    fn navigate(&self, url: &Url) {
        println!("  [navigate] {url}");
    }

    fn close(&self) {
        println!("  [close]");
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let debug = args.iter().any(|a| a == "--debug");
    let strategy = if args.iter().any(|a| a == "--direct") {
        RelayStrategy::Direct
    } else {
        RelayStrategy::NestedFrame
    };

    let filter = if debug {
        "identity_negotiator=debug"
    } else {
        "identity_negotiator=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();

    if let Err(e) = run(strategy).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(strategy: RelayStrategy) -> Result<()> {
    println!("=== Sign-in ({strategy:?}) ===\n");

    let (tx, mut screens) = mpsc::unbounded_channel();
    let negotiator = Negotiator::builder()
        .backend(Arc::new(DemoBackend))
        .keys(Arc::new(DemoBackend))
        .surface(Arc::new(ConsoleSurface { screens: tx }))
        .config(NegotiatorConfig::new().with_strategy(strategy))
        .build()?;

    let rp = BrowsingContext::top_level("https://rp.example/")?;
    let caller = Caller::new(
        rp,
        Arc::new(negotiator.clone()),
        CallerConfig::new(IDP).with_strategy(strategy),
    );

    let (done_tx, mut done) = oneshot::channel();
    let session = caller.get(json!({ "privacyPolicy": "/privacy", "termsOfService": "/tos" }), |outcome| {
        let _ = done_tx.send(outcome);
    })?;
    let popup = session.popup().clone();

    loop {
        tokio::select! {
            outcome = &mut done => {
                match outcome {
                    Ok(Ok(Some(assertion))) => println!("\n✓ Signed in: {}", assertion.as_str()),
                    Ok(Ok(None)) => println!("\n✗ Cancelled"),
                    Ok(Err(e)) => println!("\n✗ Failed: {e}"),
                    Err(_) => println!("\n✗ Dialog went away"),
                }
                break;
            }
            Some(screen) = screens.recv() => {
                let command = match screen {
                    Screen::EnterEmail { error: None, .. } => Command::SubmitEmail { email: EMAIL.into() },
                    Screen::EnterPassword { error: None, .. } => {
                        Command::SubmitPassword { password: PASSWORD.into() }
                    }
                    Screen::EnterEmail { .. } | Screen::EnterPassword { .. } | Screen::Error { .. } => {
                        Command::Cancel
                    }
                    _ => continue,
                };
                println!("  [user] {}", command.name());
                if let Err(e) = negotiator.send(&popup, command) {
                    println!("  [user] ignored: {e}");
                }
            }
        }
    }

    Ok(())
}
