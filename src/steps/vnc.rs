use std::net::TcpListener;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::pipeline::{Step, StepAction};
use crate::vm::VncEndpoint;

const PASSWORD_LEN: usize = 8;

/// First port in `[min, max]` that can be bound on `address` right now.
///
/// The probe listener is dropped before returning; the hypervisor binds the
/// port itself a moment later.
pub fn free_port(address: &str, min: u32, max: u32) -> Result<u16, BuildError> {
    let max = max.min(u32::from(u16::MAX));
    for port in min..=max {
        let Ok(port) = u16::try_from(port) else { break };
        match TcpListener::bind((address, port)) {
            Ok(_) => return Ok(port),
            Err(e) => debug!(address, port, error = %e, "VNC port unavailable"),
        }
    }
    Err(BuildError::other(format!(
        "no free VNC port between {min} and {max} on {address}"
    )))
}

pub fn generate_password() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..PASSWORD_LEN].to_string()
}

/// Picks the framebuffer endpoint for the VM.
pub struct ConfigureVnc;

#[async_trait]
impl Step for ConfigureVnc {
    fn name(&self) -> &'static str {
        "configure-vnc"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let vnc = &ctx.config.vnc;
        let port = match free_port(&vnc.bind_address, vnc.port_min, vnc.port_max) {
            Ok(p) => p,
            Err(e) => return ctx.fail(e),
        };
        let password = vnc.use_password.then(generate_password);

        info!(
            address = %vnc.bind_address,
            port,
            password = password.is_some(),
            "VNC endpoint configured"
        );
        ctx.vnc = Some(VncEndpoint {
            bind_address: vnc.bind_address.clone(),
            port,
            password,
        });
        ctx.put_generated("VNCPort", port);
        StepAction::Continue
    }
}
