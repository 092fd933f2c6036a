//! End-to-end negotiations: caller, relay, negotiator dialog, provisioning.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use identity_negotiator::provisioning::PROVISIONING_SCOPE;
use identity_negotiator::{
    AccountService, AddressInfo, AddressInfoLookup, Assertion, AssertionIssuer, AssertionRequest,
    BrowsingContext, Caller, CallerConfig, CallerOutcome, CallerSession, Channel, ChannelConfig,
    CollaboratorResult, Command, Error, KeyGenError, KeyPair, KeyPairGenerator, Negotiator,
    NegotiatorConfig, RelayStrategy, Screen, SecretKey, Surface, TargetOrigin,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use url::Url;

// ============================================================================
// Fixtures
// ============================================================================

const IDP: &str = "https://idp.example";
const PASSWORD: &str = "correct horse";

#[derive(Default)]
struct Backend {
    emails: Vec<String>,
    issued: Mutex<Vec<AssertionRequest>>,
}

#[async_trait]
impl AddressInfoLookup for Backend {
    async fn address_info(&self, email: &str) -> CollaboratorResult<AddressInfo> {
        if email.ends_with("@primary.example") {
            return Ok(AddressInfo::primary(
                Url::parse("https://primary.example/auth").expect("auth url"),
                Url::parse("https://primary.example/provision").expect("prov url"),
            ));
        }
        Ok(AddressInfo::secondary(email.starts_with("known")))
    }
}

#[async_trait]
impl AssertionIssuer for Backend {
    async fn issue(&self, request: AssertionRequest) -> CollaboratorResult<Option<Assertion>> {
        let assertion = match &request.certificate {
            Some(key) => format!("ASSERTION:{}", key.certificate),
            None => "ASSERTION1".to_string(),
        };
        self.issued.lock().push(request);
        Ok(Some(Assertion::new(assertion)))
    }
}

#[async_trait]
impl AccountService for Backend {
    async fn list_emails(&self) -> CollaboratorResult<Vec<String>> {
        Ok(self.emails.clone())
    }

    async fn authenticate(&self, _email: &str, password: &str) -> CollaboratorResult<bool> {
        Ok(password == PASSWORD)
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

struct Keys;

#[async_trait]
impl KeyPairGenerator for Keys {
    async fn generate(&self) -> Result<KeyPair, KeyGenError> {
        Ok(KeyPair::new("PUBKEY", SecretKey::new(vec![1u8, 2, 3])))
    }
}

/// Surface that streams rendered screens to the test.
struct ScreenFeed {
    screens: mpsc::UnboundedSender<Screen>,
    navigations: Mutex<Vec<Url>>,
    closed: AtomicBool,
}

impl Surface for ScreenFeed {
    fn render(&self, screen: &Screen) {
        let _ = self.screens.send(screen.clone());
    }

    fn navigate(&self, url: &Url) {
        self.navigations.lock().push(url.clone());
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct Harness {
    negotiator: Negotiator,
    backend: Arc<Backend>,
    surface: Arc<ScreenFeed>,
    screens: mpsc::UnboundedReceiver<Screen>,
    rp: BrowsingContext,
    strategy: RelayStrategy,
}

impl Harness {
    fn new(emails: &[&str], strategy: RelayStrategy) -> Self {
        Self::with_config(emails, NegotiatorConfig::new().with_strategy(strategy))
    }

    fn with_config(emails: &[&str], config: NegotiatorConfig) -> Self {
        let strategy = config.strategy;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let backend = Arc::new(Backend {
            emails: emails.iter().map(ToString::to_string).collect(),
            ..Backend::default()
        });
        let (tx, screens) = mpsc::unbounded_channel();
        let surface = Arc::new(ScreenFeed {
            screens: tx,
            navigations: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        let negotiator = Negotiator::builder()
            .backend(Arc::clone(&backend))
            .keys(Arc::new(Keys))
            .surface(surface.clone())
            .config(config)
            .build()
            .expect("negotiator");

        Self {
            negotiator,
            backend,
            surface,
            screens,
            rp: BrowsingContext::top_level("https://rp.example/login").expect("rp"),
            strategy,
        }
    }

    fn get(&self, options: Value) -> (CallerSession, oneshot::Receiver<CallerOutcome>) {
        let caller = Caller::new(
            self.rp.clone(),
            Arc::new(self.negotiator.clone()),
            CallerConfig::new(IDP).with_strategy(self.strategy),
        );
        let (tx, rx) = oneshot::channel();
        let session = caller
            .get(options, move |outcome| {
                let _ = tx.send(outcome);
            })
            .expect("get");
        (session, rx)
    }

    async fn screen(&mut self, wanted: impl Fn(&Screen) -> bool) -> Screen {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let screen = self.screens.recv().await.expect("surface alive");
                if wanted(&screen) {
                    return screen;
                }
            }
        })
        .await
        .expect("screen rendered")
    }

    fn send(&self, session: &CallerSession, command: Command) {
        self.negotiator
            .send(session.popup(), command)
            .expect("negotiation running");
    }
}

async fn outcome(rx: oneshot::Receiver<CallerOutcome>) -> CallerOutcome {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("outcome delivered")
        .expect("callback fired")
}

async fn provisioning_frame(dialog: &BrowsingContext) -> BrowsingContext {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(frame) = dialog.frames().pop() {
                return frame;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("provisioning frame embedded")
}

fn provider(dialog: &BrowsingContext, frame: &BrowsingContext) -> Channel {
    frame.mark_loaded();
    Channel::build(
        ChannelConfig::new(
            frame.clone(),
            dialog.clone(),
            TargetOrigin::Exact(dialog.origin().clone()),
        )
        .with_scope(PROVISIONING_SCOPE),
    )
    .expect("provider channel")
}

// ============================================================================
// Secondary addresses
// ============================================================================

#[tokio::test]
async fn test_secondary_sign_in_end_to_end() {
    let mut harness = Harness::new(&[], RelayStrategy::NestedFrame);
    let (session, rx) = harness.get(json!({}));

    harness.screen(|s| matches!(s, Screen::EnterEmail { .. })).await;
    harness.send(&session, Command::SubmitEmail { email: "known@rp.example".into() });

    harness.screen(|s| matches!(s, Screen::EnterPassword { .. })).await;
    harness.send(&session, Command::SubmitPassword { password: "wrong".into() });
    let screen = harness
        .screen(|s| matches!(s, Screen::EnterPassword { error: Some(_), .. }))
        .await;
    assert_eq!(
        screen,
        Screen::EnterPassword {
            email: "known@rp.example".into(),
            error: Some("incorrect password".into()),
        }
    );

    harness.send(&session, Command::SubmitPassword { password: PASSWORD.into() });
    assert_eq!(outcome(rx).await, Ok(Some(Assertion::new("ASSERTION1"))));

    assert!(session.popup().is_closed());
    assert!(harness.rp.frames().is_empty());
    assert!(harness.surface.closed.load(Ordering::SeqCst));
    assert_eq!(harness.negotiator.active_count(), 0);

    let issued = harness.backend.issued.lock();
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].audience.as_str(), "https://rp.example");
    assert!(issued[0].certificate.is_none());
}

#[tokio::test]
async fn test_cancel_delivers_null_once() {
    let mut harness = Harness::new(&[], RelayStrategy::NestedFrame);
    let (session, rx) = harness.get(Value::Null);

    harness.screen(|s| matches!(s, Screen::EnterEmail { .. })).await;
    let popup = session.popup().clone();
    harness.send(&session, Command::Cancel);

    assert_eq!(outcome(rx).await, Ok(None));
    assert!(!harness.negotiator.is_active(&popup));
    assert!(harness.negotiator.send(&popup, Command::Cancel).is_err());
}

#[tokio::test]
async fn test_invalid_required_email_is_reported() {
    let harness = Harness::new(&[], RelayStrategy::NestedFrame);
    let (_session, rx) = harness.get(json!({ "requiredEmail": "not-an-address" }));

    let err = outcome(rx).await.expect_err("invalid options");
    assert_eq!(err.code, "invalid_required_email");
    assert_eq!(err.message, "invalid required email: not-an-address");
    assert_eq!(harness.negotiator.active_count(), 0);
}

#[tokio::test]
async fn test_direct_strategy_pick_email() {
    let mut harness = Harness::new(&["alice@rp.example", "bob@rp.example"], RelayStrategy::Direct);
    let (session, rx) = harness.get(json!({}));

    let screen = harness.screen(|s| matches!(s, Screen::PickEmail { .. })).await;
    let Screen::PickEmail { emails, selected, .. } = screen else {
        unreachable!();
    };
    assert_eq!(emails, vec!["alice@rp.example", "bob@rp.example"]);
    assert_eq!(selected.as_deref(), Some("alice@rp.example"));

    harness.send(&session, Command::PickEmail { email: "bob@rp.example".into() });
    assert_eq!(outcome(rx).await, Ok(Some(Assertion::new("ASSERTION1"))));
    assert_eq!(harness.backend.issued.lock()[0].email, "bob@rp.example");
}

#[tokio::test]
async fn test_missing_relay_is_fatal() {
    let harness = Harness::new(&[], RelayStrategy::NestedFrame);
    let dialog = harness
        .rp
        .open_popup("https://idp.example/sign_in#__persona_relay_gone")
        .expect("popup");

    let err = identity_negotiator::DocumentHost::load(&harness.negotiator, &dialog)
        .expect_err("no relay");
    assert!(matches!(err, Error::RelayNotFound));
    assert_eq!(err.to_string(), "relay frame not found");
}

// ============================================================================
// Primary addresses
// ============================================================================

#[tokio::test]
async fn test_primary_provisioning_end_to_end() -> anyhow::Result<()> {
    let mut harness = Harness::new(&[], RelayStrategy::NestedFrame);
    let (session, rx) = harness.get(json!({}));
    let dialog = session.popup().clone();

    harness.screen(|s| matches!(s, Screen::EnterEmail { .. })).await;
    harness.send(&session, Command::SubmitEmail { email: "carol@primary.example".into() });

    let frame = provisioning_frame(&dialog).await;
    assert_eq!(frame.url().as_str(), "https://primary.example/provision");
    let idp = provider(&dialog, &frame);

    let begin = idp.request("beginProvisioning", Value::Null).await?;
    assert_eq!(begin["email"], "carol@primary.example");
    assert_eq!(begin["cert_duration_s"], 3600);
    assert_eq!(idp.request("genKeyPair", Value::Null).await?, json!("PUBKEY"));
    idp.notify("registerCertificate", json!("CERT-CAROL"))?;

    assert_eq!(outcome(rx).await, Ok(Some(Assertion::new("ASSERTION:CERT-CAROL"))));
    assert!(dialog.frames().is_empty());

    let issued = harness.backend.issued.lock();
    let key = issued[0]
        .certificate
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("issuer saw no certified key"))?;
    assert_eq!(key.key_pair.public_key(), "PUBKEY");
    Ok(())
}

#[tokio::test]
async fn test_provisioning_timeout_reaches_caller() {
    let config = NegotiatorConfig::new().with_provisioning_timeout(Duration::from_millis(50));
    let mut harness = Harness::with_config(&[], config);
    let (session, rx) = harness.get(json!({}));
    let dialog = session.popup().clone();

    harness.screen(|s| matches!(s, Screen::EnterEmail { .. })).await;
    harness.send(&session, Command::SubmitEmail { email: "erin@primary.example".into() });

    let frame = provisioning_frame(&dialog).await;
    frame.mark_loaded();

    let err = outcome(rx).await.expect_err("provisioning timed out");
    assert_eq!(err.code, "timeoutError");
    assert_eq!(err.message, "Provisioning timed out.");

    let screen = harness.screen(|s| matches!(s, Screen::Error { .. })).await;
    assert!(matches!(screen, Screen::Error { retryable: false, .. }));
    assert_eq!(harness.negotiator.active_count(), 0);
}

#[tokio::test]
async fn test_primary_requires_provider_sign_in() -> anyhow::Result<()> {
    let mut harness = Harness::new(&[], RelayStrategy::NestedFrame);
    let (session, rx) = harness.get(json!({}));
    let dialog = session.popup().clone();

    harness.screen(|s| matches!(s, Screen::EnterEmail { .. })).await;
    harness.send(&session, Command::SubmitEmail { email: "dave@primary.example".into() });

    let frame = provisioning_frame(&dialog).await;
    let idp = provider(&dialog, &frame);
    idp.notify("raiseProvisioningFailure", json!("user is not authenticated"))?;

    let screen = harness.screen(|s| matches!(s, Screen::VerifyPrimaryUser { .. })).await;
    assert_eq!(
        screen,
        Screen::VerifyPrimaryUser {
            email: "dave@primary.example".into(),
            auth_url: Url::parse("https://primary.example/auth")?,
        }
    );

    harness.send(&session, Command::VerifyWithProvider);
    harness.send(&session, Command::ProviderReturned);

    let frame = provisioning_frame(&dialog).await;
    let idp = provider(&dialog, &frame);
    idp.request("beginProvisioning", Value::Null).await?;
    idp.request("genKeyPair", Value::Null).await?;
    idp.notify("registerCertificate", json!("CERT-DAVE"))?;

    assert_eq!(outcome(rx).await, Ok(Some(Assertion::new("ASSERTION:CERT-DAVE"))));
    assert_eq!(
        harness.surface.navigations.lock().as_slice(),
        [Url::parse("https://primary.example/auth")?]
    );
    Ok(())
}
