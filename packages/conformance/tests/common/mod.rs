#![allow(dead_code)]

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use conformance::{
    ConformanceContext, ControllerClient, ControllerError, ControllerFuture,
    DistributedApplianceInstance, InspectionHook, InspectionPort, Inventory, MemberKind,
    MemoryInventory, NetworkElement, Port, SecurityGroup, SecurityGroupInterface,
    SecurityGroupMember,
};
use db::{DbConfig, DbError};
use futures_util::future::BoxFuture;
use job_core::{MetaTask, TaskError, TaskGraph};
use tokio::runtime::Runtime;

pub const VIRTUAL_SYSTEM: u64 = 7;
pub const HOST: &str = "host-1";
pub const DOMAIN: &str = "domain-1";

static TEST_LOCK: LazyLock<tokio::sync::Mutex<()>> =
    LazyLock::new(|| tokio::sync::Mutex::new(()));

// The database handle is process-wide and its background task lives on the
// runtime that opened it, so every engine test shares one runtime.
static RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build test runtime")
});

pub fn run<F>(test: F) -> Result<(), Box<dyn Error>>
where
    F: Future<Output = Result<(), Box<dyn Error>>>,
{
    RUNTIME.block_on(test)
}

pub async fn setup_db() -> Result<tokio::sync::MutexGuard<'static, ()>, DbError> {
    let guard = TEST_LOCK.lock().await;
    engine::try_init_logging();
    db::init(DbConfig::memory()).await?;
    let db_conn = db::get_db()?;
    db_conn.query("DELETE task; DELETE job;").await?.check()?;
    Ok(guard)
}

#[derive(Default)]
pub struct ControllerState {
    pub hooks: BTreeMap<String, InspectionHook>,
    pub port_groups: BTreeMap<String, Vec<NetworkElement>>,
    pub calls: Vec<String>,
    pub next_id: u64,
    pub install_returns_none: bool,
    pub register_returns_none: bool,
    pub recreate_on_update: bool,
    pub fail_with: Option<ControllerError>,
}

impl ControllerState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

/// Controller keeping hooks and port groups in memory and recording every call.
#[derive(Default)]
pub struct FakeController {
    state: Mutex<ControllerState>,
}

impl FakeController {
    pub fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Calls other than reads.
    pub fn writes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("get_"))
            .collect()
    }

    fn call<T, F>(&self, name: &str, op: F) -> ControllerFuture<'_, T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ControllerState) -> T,
    {
        let mut state = self.state();
        state.calls.push(name.to_string());
        let result = match state.fail_with.clone() {
            Some(e) => Err(e),
            None => Ok(op(&mut *state)),
        };
        Box::pin(std::future::ready(result))
    }
}

impl ControllerClient for FakeController {
    fn get_inspection_hook(&self, hook_id: String) -> ControllerFuture<'_, Option<InspectionHook>> {
        self.call("get_inspection_hook", |s| s.hooks.get(&hook_id).cloned())
    }

    fn install_inspection_hook(&self, hook: InspectionHook) -> ControllerFuture<'_, Option<String>> {
        self.call("install_inspection_hook", |s| {
            if s.install_returns_none {
                return None;
            }
            let id = s.next_id("hook");
            s.hooks.insert(
                id.clone(),
                InspectionHook {
                    hook_id: Some(id.clone()),
                    ..hook
                },
            );
            Some(id)
        })
    }

    fn update_inspection_hook(&self, hook: InspectionHook) -> ControllerFuture<'_, ()> {
        self.call("update_inspection_hook", |s| {
            if let Some(id) = hook.hook_id.clone() {
                s.hooks.insert(id, hook);
            }
        })
    }

    fn remove_inspection_hook(&self, hook_id: String) -> ControllerFuture<'_, ()> {
        self.call("remove_inspection_hook", |s| {
            s.hooks.remove(&hook_id);
        })
    }

    fn register_network_element(
        &self,
        parent_id: String,
        ports: Vec<NetworkElement>,
    ) -> ControllerFuture<'_, Option<NetworkElement>> {
        self.call("register_network_element", |s| {
            if s.register_returns_none {
                return None;
            }
            let id = s.next_id("pg");
            s.port_groups.insert(id.clone(), ports);
            Some(NetworkElement::new(id, Some(parent_id)))
        })
    }

    fn update_network_element(
        &self,
        group: NetworkElement,
        ports: Vec<NetworkElement>,
    ) -> ControllerFuture<'_, Option<NetworkElement>> {
        self.call("update_network_element", |s| {
            let id = if s.recreate_on_update {
                s.port_groups.remove(&group.element_id);
                s.next_id("pg")
            } else {
                group.element_id.clone()
            };
            s.port_groups.insert(id.clone(), ports);
            Some(NetworkElement::new(id, group.parent_id))
        })
    }

    fn delete_network_element(&self, group: NetworkElement) -> ControllerFuture<'_, ()> {
        self.call("delete_network_element", |s| {
            s.port_groups.remove(&group.element_id);
        })
    }
}

/// Inventory and controller wired into a context.
pub struct Fixture {
    pub inventory: Arc<MemoryInventory>,
    pub controller: Arc<FakeController>,
    pub ctx: ConformanceContext,
}

impl Fixture {
    pub fn new() -> Self {
        let inventory = Arc::new(MemoryInventory::new());
        let controller = Arc::new(FakeController::default());
        let ctx = ConformanceContext::new(inventory.clone(), controller.clone());
        Self {
            inventory,
            controller,
            ctx,
        }
    }

    /// Security group with one VM member exposing port `id * 100`.
    pub fn security_group(&self, id: u64, name: &str) -> SecurityGroup {
        let sg = SecurityGroup::new(id, name, "project").with_member(vm_member(id * 100));
        self.inventory.save_security_group(sg.clone());
        sg
    }

    pub fn interface(&self, id: u64, name: &str, security_group_id: u64) -> SecurityGroupInterface {
        let mut sgi = SecurityGroupInterface::new(id, name, VIRTUAL_SYSTEM)
            .with_security_group(security_group_id);
        sgi.tag = id;
        sgi.order = id * 10;
        self.inventory.save_interface(sgi.clone());
        sgi
    }

    /// DAI of the test virtual system deployed next to the member ports.
    pub fn deployed_instance(&self, id: u64, name: &str) -> DistributedApplianceInstance {
        let dai = DistributedApplianceInstance::new(id, name, VIRTUAL_SYSTEM)
            .with_location(HOST, DOMAIN)
            .with_inspection_ports(format!("ingress-{}", id), format!("egress-{}", id));
        self.inventory.save_instance(dai.clone());
        dai
    }

    pub fn assign(&self, dai_id: u64, port_id: u64) {
        let mut dai = self.inventory.instance(dai_id).unwrap();
        dai.protected_ports.insert(port_id);
        self.inventory.save_instance(dai);
    }

    /// Install a hook for the interface pointing at `port` and record its id.
    pub fn install_hook(&self, sgi_id: u64, port: InspectionPort) -> String {
        let hook_id = format!("hook-{}", sgi_id);
        let mut sgi = self.inventory.interface(sgi_id).unwrap();
        self.controller.state().hooks.insert(
            hook_id.clone(),
            InspectionHook {
                hook_id: Some(hook_id.clone()),
                inspected_element_id: "pg-existing".to_string(),
                inspection_port: port,
                tag: sgi.tag,
                order: sgi.order,
            },
        );
        sgi.network_element_id = Some(hook_id.clone());
        self.inventory.save_interface(sgi);
        hook_id
    }

    pub fn set_port_group(&self, sg_id: u64, element_id: &str) {
        let mut sg = self.inventory.security_group(sg_id).unwrap();
        sg.network_element_id = Some(element_id.to_string());
        self.inventory.save_security_group(sg);
    }
}

pub fn vm_member(port_id: u64) -> SecurityGroupMember {
    SecurityGroupMember::new(
        port_id,
        format!("vm-{}", port_id),
        MemberKind::Vm,
        vec![
            Port::new(port_id, format!("port-{}", port_id))
                .with_host(HOST)
                .with_domain(DOMAIN),
        ],
    )
}

pub async fn expand(task: &impl MetaTask) -> Result<TaskGraph, TaskError> {
    task.expand().await
}

/// Run every task of the graph in dependency order, descending into the
/// graphs meta tasks return. Stops at the first failure.
pub fn run_graph(graph: TaskGraph) -> BoxFuture<'static, Result<(), TaskError>> {
    Box::pin(async move {
        for index in graph.dependency_order() {
            let Some(node) = graph.node(index) else {
                continue;
            };
            if let Some(sub) = node.body.run().await? {
                run_graph(sub).await?;
            }
        }
        Ok(())
    })
}
