//! Border-router bring-up and the mesh task loop
//!
//! Bring-up runs through fixed stages on a dedicated task thread:
//! create the mesh instance, bring up the physical interface, attach the
//! mesh interface to the local stack, start the border-routing services,
//! then loop processing mesh work until a pseudo-reset is requested.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ipnet::Ipv6Net;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{BorderRouterConfig, PrefixWait};
use crate::context::BorderRouterContext;
use crate::error::{BorderRouterError, NetError, Result};
use crate::infra_if::InfraIf;
use crate::logging;
use crate::mdns::MdnsProxy;
use crate::mesh::{MeshError, MeshStack};
use crate::netif::{AddrState, LINK_LOCAL_SLOT, NetifId};
use crate::notify::{TaskNotifier, TaskWaiter, task_notification};
use crate::pbuf::BufferPool;
use crate::platform::Platform;
use crate::stack::{NetCore, NetifTable};
use crate::thread_if::ThreadNetif;

/// Slot of the infra interface that receives the static on-link address
pub const STATIC_ADDR_SLOT: usize = 1;

/// Name of the mesh task thread
pub const TASK_NAME: &str = "ot";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    InitStack,
    InitPhysicalIf,
    AttachMeshIf,
    StartServices,
    RunLoop,
    Finalize,
}

/// Services running on the physical interface
struct Services<M: MeshStack> {
    infra_if: Option<Arc<InfraIf>>,
    mdns: Option<Arc<MdnsProxy<M>>>,
    mdns_thread: Option<JoinHandle<()>>,
}

impl<M: MeshStack> Services<M> {
    fn none() -> Self {
        Self {
            infra_if: None,
            mdns: None,
            mdns_thread: None,
        }
    }

    fn shutdown(mut self, ctx: &BorderRouterContext<M>) {
        if let Some(mdns) = self.mdns.take() {
            mdns.stop();
            ctx.with_mesh(|mesh| mesh.set_udp_forwarder(None));
        }
        if let Some(thread) = self.mdns_thread.take()
            && thread.join().is_err()
        {
            warn!("mDNS receiver panicked");
        }
        if let Some(infra) = self.infra_if.take() {
            ctx.with_mesh(|mesh| mesh.set_infra_if_platform(None));
            infra.deinit();
        }
    }
}

/// The border-router application
pub struct BorderRouter<P: Platform> {
    platform: P,
    config: BorderRouterConfig,
    notifier: TaskNotifier,
    waiter: TaskWaiter,
    stage: Arc<Mutex<Stage>>,
}

/// Handle to a border router running on its task thread
pub struct BorderRouterHandle {
    notifier: TaskNotifier,
    stage: Arc<Mutex<Stage>>,
    thread: JoinHandle<Result<Stage>>,
}

impl BorderRouterHandle {
    /// Wake the task loop
    pub fn notifier(&self) -> &TaskNotifier {
        &self.notifier
    }

    /// Last stage entered
    pub fn stage(&self) -> Stage {
        *self.stage.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the task to exit; returns the final stage or the bring-up error
    ///
    /// After a failed bring-up, [`BorderRouterHandle::stage`] keeps the stage that failed.
    pub fn join(self) -> Result<Stage> {
        self.thread
            .join()
            .map_err(|_| BorderRouterError::Platform("border router task panicked".into()))?
    }
}

/// Validate the configuration, install logging and start the task
pub fn start<P: Platform>(platform: P, config: BorderRouterConfig) -> Result<BorderRouterHandle> {
    config.validate()?;
    logging::init(&config.log_filter);
    BorderRouter::new(platform, config).spawn()
}

impl<P: Platform> BorderRouter<P> {
    pub fn new(platform: P, config: BorderRouterConfig) -> Self {
        let (notifier, waiter) = task_notification();
        Self {
            platform,
            config,
            notifier,
            waiter,
            stage: Arc::new(Mutex::new(Stage::InitStack)),
        }
    }

    pub fn notifier(&self) -> TaskNotifier {
        self.notifier.clone()
    }

    /// Run on a dedicated task thread
    pub fn spawn(self) -> Result<BorderRouterHandle> {
        let notifier = self.notifier.clone();
        let stage = Arc::clone(&self.stage);
        let thread = thread::Builder::new()
            .name(TASK_NAME.to_string())
            .spawn(move || self.run())?;
        Ok(BorderRouterHandle {
            notifier,
            stage,
            thread,
        })
    }

    fn enter(&self, stage: Stage) {
        *self.stage.lock() = stage;
        debug!(?stage, "Entering stage");
    }

    /// Bring up, run the loop until a pseudo-reset, finalize
    ///
    /// The mesh instance is finalized on every exit path once it exists.
    pub fn run(mut self) -> Result<Stage> {
        self.enter(Stage::InitStack);
        self.platform.init_hardware();
        let mesh = self
            .platform
            .init_mesh(self.config.instance_mode, self.notifier.clone())?;
        if self.config.diagnostics {
            mesh.diag_init();
        }
        if self.config.cli {
            self.platform.register_cli(&mesh);
        }

        let (core, inbound) = NetCore::new(self.config.inbound_queue_depth);
        let pool = BufferPool::new(self.config.pool_segment_size, self.config.pool_segment_count);
        let ctx = BorderRouterContext::new(mesh, core, pool, self.notifier.clone());
        self.platform.start_stack(Arc::clone(&ctx.core), inbound);

        let result = self.bring_up_and_run(&ctx);
        match &result {
            Ok(()) => self.enter(Stage::Finalize),
            Err(e) => error!(stage = ?*self.stage.lock(), error = %e, "Border router bring-up failed"),
        }

        ctx.with_mesh(|mesh| {
            mesh.set_receive_callback(None);
            mesh.set_state_changed_callback(None);
            mesh.finalize();
        });
        info!("Mesh instance finalized");

        result.map(|()| Stage::Finalize)
    }

    fn bring_up_and_run(&mut self, ctx: &BorderRouterContext<P::Mesh>) -> Result<()> {
        self.enter(Stage::InitPhysicalIf);
        let infra = self
            .platform
            .bring_up_infra(&ctx.core, &self.config.infra, self.config.address_slots)?;
        if let Some(id) = infra {
            ensure_link_local(&ctx.core, id)?;
        }

        self.enter(Stage::AttachMeshIf);
        let thread_if = ThreadNetif::attach(ctx, self.config.address_slots);
        thread_if.install_state_listener(ctx, self.config.address_slots);

        self.enter(Stage::StartServices);
        let services = self.start_services(ctx, infra);

        self.enter(Stage::RunLoop);
        self.main_loop(ctx);

        services.shutdown(ctx);
        thread_if.detach(ctx);
        Ok(())
    }

    fn start_services(&self, ctx: &BorderRouterContext<P::Mesh>, infra: Option<NetifId>) -> Services<P::Mesh> {
        let Some(infra_id) = infra else {
            info!("Border Routing feature is disabled: infra interface is missing");
            return Services::none();
        };
        let index = infra_id.0;

        let routing = ctx.with_mesh(|mesh| {
            mesh.border_routing_init(index, true)?;
            mesh.set_border_routing_enabled(true)?;
            mesh.set_srp_server_enabled(true);
            Ok::<(), MeshError>(())
        });
        if let Err(e) = routing {
            warn!(index, error = %e, "Failed to enable border routing");
        }

        let infra_if = InfraIf::init(ctx, &self.platform, Some(infra_id));

        match wait_for_on_link_prefix(ctx, self.config.prefix_wait) {
            Ok(prefix) => {
                let addr = prefix.addr();
                match ctx.with_core(|table| add_static_ipv6(table, infra_id, STATIC_ADDR_SLOT, addr)) {
                    Ok(()) => info!(address = %addr, prefix = %prefix, "Static on-link address configured"),
                    Err(e) => warn!(address = %addr, error = %e, "Failed to configure static address"),
                }
            }
            Err(e) => warn!(error = %e, "No on-link prefix, static address not configured"),
        }

        let mut services = Services {
            infra_if,
            mdns: None,
            mdns_thread: None,
        };

        if self.config.mdns_proxy {
            match MdnsProxy::start(ctx, &self.platform, infra_id) {
                Ok(proxy) => {
                    let runner = Arc::clone(&proxy);
                    match thread::Builder::new()
                        .name("mdns-rx".to_string())
                        .spawn(move || runner.run_receiver())
                    {
                        Ok(handle) => services.mdns_thread = Some(handle),
                        Err(e) => warn!(error = %e, "Failed to spawn mDNS receiver"),
                    }
                    services.mdns = Some(proxy);
                }
                Err(e) => warn!(error = %e, "Failed to start mDNS proxy"),
            }
        }

        services
    }

    fn main_loop(&self, ctx: &BorderRouterContext<P::Mesh>) {
        ctx.with_mesh(|mesh| mesh.process_drivers());

        loop {
            {
                let mesh = ctx.task.lock();
                if mesh.pseudo_reset_requested() {
                    info!("Pseudo-reset requested, leaving task loop");
                    break;
                }
                mesh.process_tasklets();
                mesh.process_drivers();
            }

            if !self.waiter.wait() {
                break;
            }
        }
    }
}

/// Give a freshly registered physical interface its EUI-64 link-local address
fn ensure_link_local(core: &NetCore, id: NetifId) -> std::result::Result<(), NetError> {
    let mut table = core.lock();
    let netif = table.require_mut(id)?;
    let has_link_local = netif
        .addr_slot(LINK_LOCAL_SLOT)
        .is_some_and(|s| s.state.is_valid());
    if !has_link_local
        && let Some(addr) = netif.create_ip6_linklocal_address()
    {
        info!(netif = %id, address = %addr, "Created link-local address");
    }
    Ok(())
}

/// Write a never-expiring address into `slot` and mark it valid
pub fn add_static_ipv6(table: &mut NetifTable, id: NetifId, slot: usize, addr: Ipv6Addr) -> std::result::Result<(), NetError> {
    let netif = table.require_mut(id)?;
    netif.set_ip6_addr(slot, addr)?;
    netif.set_addr_lifetime_static(slot)?;
    netif.set_addr_state(slot, AddrState::Valid)?;
    Ok(())
}

/// Poll the mesh for the infra link's on-link prefix
///
/// The task lock is taken per poll, never across the wait.
pub fn wait_for_on_link_prefix<M: MeshStack>(
    ctx: &BorderRouterContext<M>,
    policy: PrefixWait,
) -> std::result::Result<Ipv6Net, MeshError> {
    match policy {
        PrefixWait::Spin => loop {
            match ctx.with_mesh(|mesh| mesh.on_link_prefix()) {
                Err(MeshError::InvalidState) => std::hint::spin_loop(),
                other => return other,
            }
        },
        PrefixWait::Backoff {
            attempts,
            initial_ms,
            max_ms,
        } => {
            let mut delay = Duration::from_millis(initial_ms);
            let max = Duration::from_millis(max_ms);
            for attempt in 0..attempts.max(1) {
                match ctx.with_mesh(|mesh| mesh.on_link_prefix()) {
                    Err(MeshError::InvalidState) => {
                        debug!(attempt, delay_ms = delay.as_millis() as u64, "On-link prefix not ready");
                        thread::sleep(delay);
                        delay = (delay * 2).min(max);
                    }
                    other => return other,
                }
            }
            Err(MeshError::InvalidState)
        }
    }
}

/// Fatal hook: a task overflowed its stack
pub fn stack_overflow_hook(task_name: &str) -> ! {
    error!(task = task_name, "Stack overflow detected");
    panic!("stack overflow in task {task_name}");
}

/// Fatal hook: the allocator ran out of memory
pub fn alloc_failed_hook(size: usize) -> ! {
    error!(size, "Memory allocation failed");
    panic!("allocation of {size} bytes failed");
}
