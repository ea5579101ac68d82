//! Server lifecycle
//!
//! Startup: open the monitor session, start listening, register in the
//! placement hierarchy, boot, then poll the cluster map until this OSD is
//! observed up; a node not observed up within the startup window fails
//! fatally. Shutdown: ask to be marked down, poll until the map reflects
//! it (logged, not fatal), then destroy every object.

use crate::dispatch::ClassLoader;
use crate::mon::{MonClient, MonitorClient};
use crate::session::{ServerShared, run_session};
use memosd_common::{Error, OsdOptions, Result};
use memosd_store::ObjectStore;
use memosd_wire::ClusterMap;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// How long to wait for the map to reflect a state change
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Map poll step while waiting
pub const MAP_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// One OSD server instance
pub struct OsdServer {
    shared: Rc<ServerShared>,
    osd: i32,
    mon: Option<Box<dyn MonitorClient>>,
    addr: Option<String>,
    accept_task: Option<tokio::task::JoinHandle<()>>,
}

impl OsdServer {
    /// Create a server from validated options. `loader` supplies the
    /// object-class capability; without one, CALL ops are unsupported.
    pub fn new(options: OsdOptions, loader: Option<Box<dyn ClassLoader>>) -> Result<Self> {
        options.validate()?;
        let osd = options.osd_id;
        let store = ObjectStore::new(options.noop_write);
        Ok(Self {
            shared: Rc::new(ServerShared {
                options,
                store: RefCell::new(store),
                map: RefCell::new(ClusterMap::new()),
                loader: loader.map(RefCell::new),
            }),
            osd,
            mon: None,
            addr: None,
            accept_task: None,
        })
    }

    /// The address peers reach this server at, once started
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr.as_ref().and_then(|a| a.parse().ok())
    }

    /// Number of objects currently resident
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.shared.store.borrow().len()
    }

    /// Open the monitor session and start serving
    pub async fn start(&mut self) -> Result<()> {
        let mon = MonClient::connect(&self.shared.options.mon_addrs).await?;
        self.start_with_monitor(Box::new(mon)).await
    }

    /// Start serving against an already-open monitor capability
    pub async fn start_with_monitor(&mut self, mut mon: Box<dyn MonitorClient>) -> Result<()> {
        let listener = TcpListener::bind(self.shared.options.listen).await?;
        let addr = listener.local_addr()?.to_string();
        info!(%addr, "listening for peers");

        mon.add_to_crush(self.osd, &self.shared.options.weight)
            .await?;
        info!(
            osd = self.osd,
            weight = %self.shared.options.weight,
            "registered in placement hierarchy"
        );

        mon.boot(self.osd, self.shared.options.fsid, &addr).await?;

        if !self.wait_for_state(&mut *mon, &addr, true).await? {
            return Err(Error::Timeout);
        }
        info!(
            osd = self.osd,
            epoch = self.shared.map.borrow().epoch(),
            "osd booted"
        );

        let shared = self.shared.clone();
        self.accept_task = Some(tokio::task::spawn_local(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tokio::task::spawn_local(run_session(shared.clone(), stream, peer));
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        }));
        self.mon = Some(mon);
        self.addr = Some(addr);
        Ok(())
    }

    /// Poll the map until this OSD is observed with the wanted up state,
    /// or the startup window elapses.
    async fn wait_for_state(
        &self,
        mon: &mut dyn MonitorClient,
        addr: &str,
        want_up: bool,
    ) -> Result<bool> {
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        while Instant::now() < deadline {
            let have_epoch = self.shared.map.borrow().epoch();
            match mon.wait_for_latest_map(have_epoch, MAP_POLL_INTERVAL).await {
                Ok(map) => {
                    let reached =
                        map.contains(self.osd, addr) && map.is_up(self.osd) == want_up;
                    *self.shared.map.borrow_mut() = map;
                    if reached {
                        return Ok(true);
                    }
                }
                Err(Error::Timeout) => {}
                Err(e) => return Err(e),
            }
            tokio::time::sleep(MAP_POLL_INTERVAL).await;
        }
        Ok(false)
    }

    /// Gracefully leave the cluster and destroy every object
    pub async fn stop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }

        if let (Some(mut mon), Some(addr)) = (self.mon.take(), self.addr.clone()) {
            match mon.mark_me_down(self.osd).await {
                Ok(()) | Err(Error::Timeout) => {
                    match self.wait_for_state(&mut *mon, &addr, false).await {
                        Ok(true) => info!(osd = self.osd, "osd observed down"),
                        Ok(false) => {
                            warn!(osd = self.osd, "osd not observed down before timeout");
                        }
                        Err(e) => error!(error = %e, "map poll failed during shutdown"),
                    }
                }
                Err(e) => error!(error = %e, "mark down failed"),
            }
        }

        let (objects, blocks) = self.shared.store.borrow_mut().clear();
        info!(objects, blocks, "store destroyed");
    }
}
