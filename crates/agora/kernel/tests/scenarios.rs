//! End-to-end scenarios through the kernel facade.

use std::sync::{Arc, Mutex};

use agora_checkpoint::CheckpointManager;
use agora_gateway::{
    Capability, CapabilityFailure, CapabilityOutput, CapabilityRequest, CapabilitySpec, ErrorKind,
    GatewayError, WorldGate,
};
use agora_kernel::{Kernel, KernelConfig, PromptAgent, LLM_CAPABILITY};
use agora_types::{AccountKind, Amount, PrincipalId, QuotaKind, Usage, WorldStatus};
use agora_world::{Agent, TickContext, WorldError};
use async_trait::async_trait;
use serde_json::{json, Value};

fn config(toml: &str) -> KernelConfig {
    KernelConfig::from_toml(toml).unwrap()
}

fn started(config: KernelConfig) -> Kernel {
    let kernel = Kernel::bootstrap(config).unwrap();
    kernel.monitor().start().unwrap();
    kernel
}

fn llm_args(input: u64, output: u64) -> Value {
    json!({
        "prompt": "scenario",
        "usage": { "input_units": input, "output_units": output },
    })
}

fn scrip(kernel: &Kernel, id: &str) -> Amount {
    kernel
        .ledger()
        .balance(&PrincipalId::new(id), &AccountKind::Currency)
        .unwrap()
}

const TEST_AGENT: &str = r#"
    [costs]
    per_1k_input_tokens = 1
    per_1k_output_tokens = 3

    [[principals]]
    id = "test_agent"
    starting_scrip = 100
"#;

#[tokio::test]
async fn llm_call_is_charged_at_true_cost() {
    let kernel = started(config(TEST_AGENT));
    let invocation = kernel
        .gateway()
        .invoke(&PrincipalId::new("test_agent"), LLM_CAPABILITY, llm_args(500, 2000))
        .await
        .unwrap();

    assert_eq!(invocation.usage, Usage::new(500, 2000));
    assert_eq!(invocation.cost, Amount::whole(7));
    assert_eq!(scrip(&kernel, "test_agent"), Amount::whole(93));
    assert_eq!(
        kernel
            .ledger()
            .balance(&PrincipalId::new("test_agent"), &AccountKind::Quota(QuotaKind::compute()))
            .unwrap(),
        Amount::whole(999)
    );
    kernel.ledger().verify().unwrap();
}

#[tokio::test]
async fn world_budget_exhaustion_halts_invocations() {
    let kernel = started(config(
        r#"
        [costs]
        per_1k_input_tokens = 0.02
        per_1k_output_tokens = 0.03

        [[principals]]
        id = "test_agent"
        starting_scrip = 100

        [budget]
        max_api_cost = 0.10
        "#,
    ));
    let agent = PrincipalId::new("test_agent");

    for _ in 0..2 {
        let result = kernel
            .gateway()
            .invoke_artifact(&agent, LLM_CAPABILITY, llm_args(1000, 1000))
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.cost, Amount::from_f64(0.05).unwrap());
    }
    assert_eq!(kernel.monitor().status(), WorldStatus::HaltedBudgetExhausted);

    let refused = kernel
        .gateway()
        .invoke_artifact(&agent, LLM_CAPABILITY, llm_args(1000, 1000))
        .await;
    assert!(!refused.success);
    assert_eq!(refused.error_kind, Some(ErrorKind::InsufficientBudget));
    assert_eq!(scrip(&kernel, "test_agent"), Amount::from_f64(99.9).unwrap());
    assert_eq!(kernel.monitor().meter().consumed, Amount::from_f64(0.10).unwrap());
}

struct Flaky;

#[async_trait]
impl Capability for Flaky {
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec::reserved("flaky", Usage::new(1000, 1000))
            .with_quota_charge(QuotaKind::compute(), Amount::whole(5))
    }

    async fn invoke(&self, _: &CapabilityRequest) -> Result<CapabilityOutput, CapabilityFailure> {
        Err(CapabilityFailure::ExecutionFailed("upstream unavailable".into()))
    }
}

#[tokio::test]
async fn failed_capability_restores_balances_exactly() {
    let kernel = started(config(TEST_AGENT));
    kernel.register_capability(Arc::new(Flaky));
    let agent = PrincipalId::new("test_agent");

    let err = kernel
        .gateway()
        .invoke(&agent, "flaky", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::CapabilityError { .. }));

    assert_eq!(scrip(&kernel, "test_agent"), Amount::whole(100));
    assert_eq!(
        kernel
            .ledger()
            .balance(&agent, &AccountKind::Quota(QuotaKind::compute()))
            .unwrap(),
        Amount::whole(1000)
    );
    let records = kernel.gateway().records_for(&agent);
    assert_eq!(records.len(), 1);
    assert!(!records[0].succeeded());
}

#[tokio::test]
async fn disabled_rate_limiting_admits_every_call() {
    let kernel = started(config(&format!(
        "{}\n[llm]\nrate_limit_delay = 60\n[rate_limiting]\nenabled = false\n",
        TEST_AGENT
    )));
    let agent = PrincipalId::new("test_agent");
    for _ in 0..3 {
        let result = kernel
            .gateway()
            .invoke_artifact(&agent, LLM_CAPABILITY, llm_args(500, 2000))
            .await;
        assert!(result.success);
    }
    assert_eq!(scrip(&kernel, "test_agent"), Amount::whole(79));
}

#[tokio::test]
async fn enabled_rate_limiting_reports_retry_after() {
    let kernel = started(config(&format!("{}\n[llm]\nrate_limit_delay = 60\n", TEST_AGENT)));
    let agent = PrincipalId::new("test_agent");

    let first = kernel
        .gateway()
        .invoke_artifact(&agent, LLM_CAPABILITY, llm_args(500, 2000))
        .await;
    assert!(first.success);

    let second = kernel
        .gateway()
        .invoke_artifact(&agent, LLM_CAPABILITY, llm_args(500, 2000))
        .await;
    assert!(!second.success);
    assert_eq!(second.error_kind, Some(ErrorKind::RateLimited));
    let retry = second.retry_after_ms.unwrap();
    assert!(retry > 0 && retry <= 60_000);
    // A rate-limited call never touches the ledger.
    assert_eq!(scrip(&kernel, "test_agent"), Amount::whole(93));
}

struct TickRecorder {
    id: PrincipalId,
    ticks: Arc<Mutex<Vec<u64>>>,
}

#[async_trait]
impl Agent for TickRecorder {
    fn principal(&self) -> &PrincipalId {
        &self.id
    }

    async fn act(&self, ctx: &TickContext) -> anyhow::Result<()> {
        self.ticks.lock().unwrap().push(ctx.tick());
        Ok(())
    }
}

#[tokio::test]
async fn max_ticks_bounds_the_run() {
    let kernel = Kernel::bootstrap(config(&format!("{}\n[world]\nmax_ticks = 3\n", TEST_AGENT)))
        .unwrap();
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let mut world = kernel.into_world().unwrap();
    world
        .add_agent(Arc::new(TickRecorder {
            id: PrincipalId::new("test_agent"),
            ticks: Arc::clone(&ticks),
        }))
        .unwrap();

    let summary = world.run().await.unwrap();
    assert_eq!(summary.status, WorldStatus::Completed);
    assert_eq!(*ticks.lock().unwrap(), vec![1, 2, 3]);
    assert!(matches!(world.step().await, Err(WorldError::NotRunning(_))));
    assert_eq!(ticks.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn unregistered_agent_principal_is_rejected() {
    let kernel = Kernel::bootstrap(config(TEST_AGENT)).unwrap();
    let mut world = kernel.into_world().unwrap();
    let err = world
        .add_agent(Arc::new(PromptAgent::new(PrincipalId::new("stranger"), "hi")))
        .unwrap_err();
    assert!(matches!(err, WorldError::UnknownAgent(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn autonomous_loops_keep_accounts_consistent() {
    let ids = ["a", "b", "c", "d", "e", "f"];
    let mut toml = String::from(
        "[world]\nmax_ticks = 5\nverify_ledger_each_tick = true\n[execution]\nuse_autonomous_loops = true\n",
    );
    for id in ids {
        toml.push_str(&format!("[[principals]]\nid = \"{}\"\nstarting_scrip = 100\n", id));
    }
    let kernel = Kernel::bootstrap(config(&toml)).unwrap();
    let ledger = Arc::clone(kernel.ledger());
    let mut world = kernel.into_world().unwrap();
    for id in ids {
        world
            .add_agent(Arc::new(PromptAgent::new(PrincipalId::new(id), "hello")))
            .unwrap();
    }

    let summary = world.run().await.unwrap();
    assert_eq!(summary.status, WorldStatus::Completed);
    assert_eq!(summary.invocations, 30);
    assert_eq!(summary.failed_invocations, 0);
    for id in ids {
        // Five calls at 1 (input block) + 6 (two output blocks) each.
        assert_eq!(
            ledger.balance(&PrincipalId::new(id), &AccountKind::Currency).unwrap(),
            Amount::whole(65)
        );
    }
    ledger.verify().unwrap();
}

#[tokio::test]
async fn checkpoint_round_trip_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let mut first = config(&format!("{}\n[world]\nmax_ticks = 2\n", TEST_AGENT));
    first.checkpoint.dir = Some(dir.path().to_path_buf());

    let kernel = Kernel::bootstrap(first.clone()).unwrap();
    let ledger = Arc::clone(kernel.ledger());
    let mut world = kernel.into_world().unwrap();
    world
        .add_agent(Arc::new(PromptAgent::new(PrincipalId::new("test_agent"), "hello")))
        .unwrap();
    let summary = world.run().await.unwrap();
    let handle = summary.last_checkpoint.unwrap();
    assert_eq!(handle.tick, 2);

    let manager = CheckpointManager::new(dir.path(), 0).unwrap();
    let (state, restored) = manager.load(&handle).unwrap();
    assert_eq!(state, world.state());
    assert_eq!(restored.snapshot(), ledger.snapshot());

    let mut extended = first;
    extended.world.max_ticks = 4;
    let kernel = Kernel::resume_latest(extended).unwrap();
    assert_eq!(kernel.resumed_at(), Some(2));
    let resumed_ledger = Arc::clone(kernel.ledger());
    let mut world = kernel.into_world().unwrap();
    assert_eq!(world.status(), WorldStatus::Running);
    world
        .add_agent(Arc::new(PromptAgent::new(PrincipalId::new("test_agent"), "hello")))
        .unwrap();
    let summary = world.run().await.unwrap();

    assert_eq!(summary.final_tick, 4);
    assert_eq!(summary.status, WorldStatus::Completed);
    assert_eq!(
        resumed_ledger
            .balance(&PrincipalId::new("test_agent"), &AccountKind::Currency)
            .unwrap(),
        Amount::whole(72)
    );
    resumed_ledger.verify().unwrap();
    let ticks: Vec<u64> = manager.list().unwrap().iter().map(|h| h.tick).collect();
    assert_eq!(ticks, vec![2, 4]);
}

#[tokio::test]
async fn resume_without_checkpoints_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(TEST_AGENT);
    config.checkpoint.dir = Some(dir.path().to_path_buf());
    assert!(matches!(
        Kernel::resume_latest(config),
        Err(agora_kernel::KernelError::NoCheckpoint(_))
    ));
}

#[test]
fn out_of_range_rate_limit_delay_is_refused_at_bootstrap() {
    let mut config = config(TEST_AGENT);
    config.llm.rate_limit_delay = 1e13;
    assert!(matches!(
        Kernel::bootstrap(config),
        Err(agora_kernel::KernelError::Config(agora_kernel::ConfigError::OutOfRange { .. }))
    ));
}
