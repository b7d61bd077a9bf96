use async_trait::async_trait;
use outbox_application::EventCollector;
use outbox_domain::clock::{Clock, SystemClock};
use outbox_domain::config::RelayConfig;
use outbox_domain::event::Event;
use outbox_domain::eventing::{
    Dispatcher, EventEngine, EventEngineConfig, EventHandler, FailureHandler, HandledEventType,
    InMemoryTransport, Notifier, NotifyingFailureHandler, Publisher, RetryScheduler,
};
use outbox_domain::ledger::InMemoryLedger;
use outbox_domain::retry::build_retry_policy;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ulid::Ulid;

/// 从可选的配置文件（`OUTBOX_CONFIG`）与 `OUTBOX__*` 环境变量加载配置，
/// 未覆盖的间隔使用便于演示的短值
fn load_config() -> anyhow::Result<RelayConfig> {
    let mut builder = config::Config::builder()
        .set_default("default_max_retries", 2)?
        .set_default("retry.base_delay", "200ms")?
        .set_default("retry.max_delay", "1s")?
        .set_default("scheduler.poll_interval", "100ms")?;
    if let Ok(path) = std::env::var("OUTBOX_CONFIG") {
        builder = builder.add_source(config::File::with_name(&path).required(false));
    }
    let settings = builder
        .add_source(
            config::Environment::with_prefix("OUTBOX")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let cfg: RelayConfig = settings.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[derive(Debug, thiserror::Error)]
enum AccountError {
    #[error("account not opened: {0}")]
    NotOpened(String),
    #[error("insufficient funds: balance={balance}, requested={requested}")]
    InsufficientFunds { balance: i64, requested: i64 },
    #[error(transparent)]
    App(#[from] outbox_application::AppError),
}

/// 账户服务：余额变更与事件记录处于同一个单元工作中
struct AccountService {
    balances: Mutex<HashMap<String, i64>>,
    collector: EventCollector,
}

impl AccountService {
    fn event(event_type: &str, payload: serde_json::Value) -> Event {
        Event::builder()
            .id(Ulid::new().to_string())
            .event_type(event_type)
            .payload(payload)
            .build()
    }

    async fn open(&self, id: &str, initial_balance: i64) -> Result<(), AccountError> {
        self.collector
            .transactional(|| async {
                self.balances
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(id.to_string(), initial_balance);
                self.collector
                    .record(Self::event(
                        "account.opened",
                        serde_json::json!({ "account": id, "initial_balance": initial_balance }),
                    ))
                    .await?;
                Ok(())
            })
            .await
    }

    async fn withdraw(&self, id: &str, amount: i64) -> Result<i64, AccountError> {
        self.collector
            .transactional(|| async {
                let balance = {
                    let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
                    let balance = balances
                        .get_mut(id)
                        .ok_or_else(|| AccountError::NotOpened(id.to_string()))?;
                    if *balance < amount {
                        return Err(AccountError::InsufficientFunds {
                            balance: *balance,
                            requested: amount,
                        });
                    }
                    *balance -= amount;
                    *balance
                };
                self.collector
                    .record(Self::event(
                        "account.withdrawn",
                        serde_json::json!({ "account": id, "amount": amount }),
                    ))
                    .await?;
                Ok(balance)
            })
            .await
    }

    async fn deposit(&self, id: &str, amount: i64) -> Result<i64, AccountError> {
        self.collector
            .transactional(|| async {
                let balance = {
                    let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
                    let balance = balances
                        .get_mut(id)
                        .ok_or_else(|| AccountError::NotOpened(id.to_string()))?;
                    *balance += amount;
                    *balance
                };
                self.collector
                    .record(Self::event(
                        "account.deposited",
                        serde_json::json!({ "account": id, "amount": amount }),
                    ))
                    .await?;
                Ok(balance)
            })
            .await
    }

    /// 嵌套单元工作：两笔变更的事件只在转账整体成功后发布
    async fn transfer(&self, from: &str, to: &str, amount: i64) -> Result<(), AccountError> {
        self.collector
            .transactional(|| async {
                self.withdraw(from, amount).await?;
                self.deposit(to, amount).await?;
                Ok(())
            })
            .await
    }
}

/// 对账通知：首次投递失败，之后成功
#[derive(Default)]
struct StatementMailer {
    seen: Mutex<HashSet<String>>,
}

#[async_trait]
impl EventHandler for StatementMailer {
    fn handler_name(&self) -> &str {
        "statement-mailer"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::Many(vec![
            "account.withdrawn".to_string(),
            "account.deposited".to_string(),
        ])
    }

    fn accepts(&self, event: &Event) -> bool {
        event.payload()["amount"].as_i64().unwrap_or(0) < 1_000
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        let first = self
            .seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event.id().to_string());
        if first {
            anyhow::bail!("smtp relay timed out");
        }
        info!(event_id = event.id(), payload = %event.payload(), "statement mailed");
        Ok(())
    }
}

/// 大额交易风控：下游始终不可用，最终触发升级
struct FraudReview;

#[async_trait]
impl EventHandler for FraudReview {
    fn handler_name(&self) -> &str {
        "fraud-review"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::Many(vec![
            "account.withdrawn".to_string(),
            "account.deposited".to_string(),
        ])
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        anyhow::bail!("fraud service unavailable for {}", event.id())
    }
}

/// 审计：兜底处理其余类型
struct Audit;

#[async_trait]
impl EventHandler for Audit {
    fn handler_name(&self) -> &str {
        "audit"
    }

    fn handled_event_type(&self) -> HandledEventType {
        HandledEventType::All
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        info!(event_id = event.id(), event_type = event.event_type(), "audited");
        Ok(())
    }
}

struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        error!(subject, body, "operator notified");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config()?;
    info!(?config, "configuration loaded");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = Arc::new(InMemoryLedger::new());
    let transport = Arc::new(InMemoryTransport::new(1024));

    let escalation: Arc<dyn FailureHandler> = Arc::new(NotifyingFailureHandler::new(
        "ops-oncall",
        HandledEventType::All,
        Arc::new(LogNotifier),
    ));
    let handlers: Vec<Arc<dyn EventHandler>> = vec![
        Arc::new(StatementMailer::default()),
        Arc::new(FraudReview),
        Arc::new(Audit),
    ];

    let dispatcher = Arc::new(
        Dispatcher::builder()
            .ledger(ledger.clone())
            .event_handlers(handlers)
            .retry_policy(build_retry_policy(&config.retry, clock.clone(), None)?)
            .failure_handlers(vec![escalation])
            .clock(clock.clone())
            .config(config.clone())
            .build(),
    );
    let scheduler = Arc::new(
        RetryScheduler::builder()
            .ledger(ledger.clone())
            .dispatcher(dispatcher.clone())
            .clock(clock.clone())
            .config(config.scheduler.clone())
            .build(),
    );
    let engine = Arc::new(
        EventEngine::builder()
            .subscriber(transport.clone())
            .dispatcher(dispatcher)
            .scheduler(scheduler)
            .config(EventEngineConfig::from(&config))
            .build(),
    );
    let publisher = Arc::new(
        Publisher::builder()
            .ledger(ledger.clone())
            .transport(transport)
            .clock(clock)
            .config(config)
            .build(),
    );

    let handle = engine.start();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let accounts = AccountService {
        balances: Mutex::new(HashMap::new()),
        collector: EventCollector::new(publisher),
    };

    accounts.open("alice", 500).await?;
    accounts.open("bob", 0).await?;
    accounts.transfer("alice", "bob", 120).await?;
    accounts.deposit("bob", 5_000).await?;

    match accounts.transfer("alice", "bob", 10_000).await {
        Err(e) => warn!(error = %e, "transfer rejected, events discarded"),
        Ok(()) => warn!("unexpected transfer success"),
    }

    tokio::time::sleep(Duration::from_secs(3)).await;
    handle.shutdown();
    handle.join().await;

    for r in ledger.records() {
        info!(
            action = %r.action(),
            event_id = r.event_id(),
            event_type = r.event_type(),
            status = %r.status(),
            retry_times = r.retry_times(),
            version = r.version(),
            last_error = r.message().unwrap_or_default(),
            "ledger"
        );
    }
    Ok(())
}
