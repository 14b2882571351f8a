//! Bootstrap driver for FPGA peripheral discovery
//!
//! The FPGA image carries a table of driver IDs, one 16-bit big-endian
//! word per core, readable from register 0 of core 0. This driver
//! boots in slot 0, reads that table, and loads the matching registry
//! driver for each populated core. The probe retries on a timer until
//! the board answers; a board that never answers is logged and the
//! daemon keeps serving whatever was loaded explicitly.

use crate::core::driver::{Driver, Services};
use crate::core::slot::{FLAG_READ, NUM_CORES};
use crate::devices::{driver_name_for_id, DRIVER_ID_NULL};
use crate::error::{Error, Result};
use crate::link::packet::Packet;
use crate::reactor::timer::TimerId;

const RSC_DRIVLIST: usize = 0;
const REG_IDTABLE: u8 = 0;
const TOKEN_RETRY: u32 = 1;
const RETRY_MS: u64 = 100;
const MAX_ATTEMPTS: u32 = 100;

const HELP: &str = "\
enumerator: FPGA peripheral discovery
  drivlist (read): the board's core-to-driver table
";

pub struct Enumerator {
    attempts: u32,
    retry: Option<TimerId>,
    discovered: bool,
    /// The core this driver itself is bound to (normally 0)
    own_core: usize,
}

impl Enumerator {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            retry: None,
            discovered: false,
            own_core: 0,
        }
    }

    /// Request the driver-ID table and arm the retry timer
    fn probe(&mut self, ctx: &mut Services<'_>) {
        let request = Packet::read_request(REG_IDTABLE, (NUM_CORES * 2) as u8);
        match ctx.send_packet(&request) {
            Ok(()) => {}
            Err(Error::LinkBusy) => {
                log::debug!("enumerator probe deferred, link busy");
            }
            Err(e) => {
                log::warn!("enumerator probe failed: {}", e);
            }
        }
        self.retry = ctx.add_oneshot(RETRY_MS, TOKEN_RETRY).ok();
    }
}

impl Default for Enumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for Enumerator {
    fn initialize(&mut self, ctx: &mut Services<'_>) -> Result<()> {
        ctx.set_identity("enumerator", "FPGA peripheral discovery", HELP);
        ctx.add_resource("drivlist", FLAG_READ)?;
        self.own_core = ctx.bind_core()?;
        self.probe(ctx);
        Ok(())
    }

    fn on_get(&mut self, ctx: &mut Services<'_>, rsc: usize) -> Result<String> {
        debug_assert_eq!(rsc, RSC_DRIVLIST);
        if !self.discovered {
            return Ok("enumeration still in progress\n".to_string());
        }
        let mut out = String::new();
        for (core, id) in ctx.core_driver_ids() {
            if id == 0 {
                continue;
            }
            let name = driver_name_for_id(id).unwrap_or("unknown");
            out.push_str(&format!("core {:2}: driver id {:3} ({})\n", core, id, name));
        }
        Ok(out)
    }

    fn on_packet(&mut self, ctx: &mut Services<'_>, pkt: &Packet) {
        if self.discovered || !pkt.is_read_response() {
            return;
        }
        if pkt.data.len() < NUM_CORES * 2 {
            log::warn!(
                "short driver-ID table from board ({} bytes)",
                pkt.data.len()
            );
            return;
        }

        self.discovered = true;
        if let Some(id) = self.retry.take() {
            ctx.del_timer(id);
        }

        for core in 0..NUM_CORES {
            let id = u16::from_be_bytes([pkt.data[2 * core], pkt.data[2 * core + 1]]);
            if id == 0 {
                continue;
            }
            ctx.set_core_driver_id(core, id);
            if id == DRIVER_ID_NULL || core == self.own_core {
                continue;
            }
            // a slot overload already owns this core; its driver stays
            if let Some(slot) = ctx.core_owner(core) {
                log::info!("core {}: already served by slot {}, skipping", core, slot);
                continue;
            }
            let Some(name) = driver_name_for_id(id) else {
                log::warn!("core {}: no driver for advertised id {}", core, id);
                continue;
            };
            match ctx.load_driver_at_core(core, id, name) {
                Ok(slot) => log::info!("core {}: '{}' loaded into slot {}", core, name, slot),
                Err(e) => log::error!("core {}: loading '{}' failed: {}", core, name, e),
            }
        }
    }

    fn on_timer(&mut self, ctx: &mut Services<'_>, token: u32) {
        if token != TOKEN_RETRY || self.discovered {
            return;
        }
        self.attempts += 1;
        if self.attempts >= MAX_ATTEMPTS {
            log::error!(
                "board never answered the driver-ID probe after {} attempts",
                self.attempts
            );
            self.retry = None;
            return;
        }
        self.probe(ctx);
    }
}
