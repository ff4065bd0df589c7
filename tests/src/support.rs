//! Scripted modules and local servers shared by the integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vigil_common::config::ModuleConfig;
use vigil_core::{
    DataContractEntry, DataValue, Module, ModuleError, ModuleInputs, ModuleKind, ModuleMetadata,
    ModuleRegistry, OutputSink, ValueType,
};

/// Key both scripted producers append to.
pub const FINDINGS: &str = "test.findings";
pub const FINDINGS_COUNT: &str = "test.findings.count";
pub const SIDE: &str = "test.side";
pub const NEVER_PRODUCED: &str = "test.never";

/// Emits one text value per run, after an optional delay.
///
/// Config: `delay_ms`, `fail`, `panic`, and `stubborn` (ignore cancellation while
/// sleeping).
pub struct Scripted {
    meta: ModuleMetadata,
    delay: Duration,
    fail: bool,
    panic: bool,
    stubborn: bool,
}

impl Scripted {
    pub fn boxed(name: &str, key: &str) -> Box<dyn Module> {
        Box::new(Self {
            meta: ModuleMetadata::new(name, "0.1.0", ModuleKind::Scan)
                .produces(DataContractEntry::list(key, ValueType::Text)),
            delay: Duration::ZERO,
            fail: false,
            panic: false,
            stubborn: false,
        })
    }
}

#[async_trait]
impl Module for Scripted {
    fn metadata(&self) -> &ModuleMetadata {
        &self.meta
    }

    fn init(&mut self, _: &str, config: &ModuleConfig) -> Result<(), ModuleError> {
        self.delay = config.duration_ms_or("delay_ms", Duration::ZERO)?;
        self.fail = config.bool_or("fail", false)?;
        self.panic = config.bool_or("panic", false)?;
        self.stubborn = config.bool_or("stubborn", false)?;
        Ok(())
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _: ModuleInputs,
        sink: OutputSink,
    ) -> Result<(), ModuleError> {
        if self.panic {
            panic!("scripted panic in {}", sink.instance_id());
        }
        if !self.delay.is_zero() {
            if self.stubborn {
                tokio::time::sleep(self.delay).await;
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ModuleError::Cancelled),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }
        if self.fail {
            return Err(anyhow::anyhow!("scripted failure").into());
        }
        let key = &self.meta.produces[0].key;
        sink.emit(key, format!("{}-finding", sink.instance_id()));
        Ok(())
    }
}

/// Counts the values of one list key and publishes the number.
pub struct Counter {
    meta: ModuleMetadata,
}

impl Counter {
    pub fn boxed(consumes: &str, produces: &str) -> Box<dyn Module> {
        Box::new(Self {
            meta: ModuleMetadata::new("counter", "0.1.0", ModuleKind::Evaluation)
                .consumes(DataContractEntry::list(consumes, ValueType::Text))
                .produces(DataContractEntry::single(produces, ValueType::Integer)),
        })
    }
}

#[async_trait]
impl Module for Counter {
    fn metadata(&self) -> &ModuleMetadata {
        &self.meta
    }

    fn init(&mut self, _: &str, _: &ModuleConfig) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn execute(
        &self,
        _: CancellationToken,
        inputs: ModuleInputs,
        sink: OutputSink,
    ) -> Result<(), ModuleError> {
        let consumed = &self.meta.consumes[0].key;
        let count = inputs.list(consumed).len() as i64;
        sink.emit(&self.meta.produces[0].key, DataValue::Integer(count));
        Ok(())
    }
}

/// Registry with every scripted module type:
///
/// | type             | consumes         | produces         |
/// |------------------|------------------|------------------|
/// | `producer_a`     |                  | `FINDINGS`       |
/// | `producer_b`     |                  | `FINDINGS`       |
/// | `side`           |                  | `SIDE`           |
/// | `counter`        | `FINDINGS`       | `FINDINGS_COUNT` |
/// | `orphan_counter` | `NEVER_PRODUCED` | `FINDINGS_COUNT` |
pub fn scripted_registry() -> Arc<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    let registered = [
        registry.register("producer_a", || Scripted::boxed("producer_a", FINDINGS)),
        registry.register("producer_b", || Scripted::boxed("producer_b", FINDINGS)),
        registry.register("side", || Scripted::boxed("side", SIDE)),
        registry.register("counter", || Counter::boxed(FINDINGS, FINDINGS_COUNT)),
        registry.register("orphan_counter", || {
            Counter::boxed(NEVER_PRODUCED, FINDINGS_COUNT)
        }),
    ];
    for result in registered {
        if let Err(err) = result {
            panic!("scripted registry: {err}");
        }
    }
    Arc::new(registry)
}

/// Registry with the built-in probing modules.
pub fn builtin_registry() -> Arc<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    if let Err(err) = vigil_plugins::register_builtin(&mut registry) {
        panic!("builtin registry: {err}");
    }
    Arc::new(registry)
}

/// Loopback TCP server that writes `greeting` to every client and hangs up.
pub async fn greeting_server(greeting: &'static [u8]) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = stream.write_all(greeting).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    Ok((addr, handle))
}
