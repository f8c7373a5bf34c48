use async_trait::async_trait;

use crate::context::BuildContext;
use crate::pipeline::{Step, StepAction};
use crate::vm::guest_address::GuestAddressResolver;

/// Waits for the guest's DHCP lease to show up in the neighbor table.
pub struct WaitGuestAddress;

impl WaitGuestAddress {
    pub fn resolver(ctx: &BuildContext) -> GuestAddressResolver {
        GuestAddressResolver {
            dladm: ctx.config.tools.dladm.clone(),
            arp: ctx.config.tools.arp.clone(),
            vnic: ctx.config.network.vnic_name.clone(),
            timeout: ctx.config.guest_address_timeout(),
            poll_interval: ctx.config.guest_poll_interval(),
        }
    }
}

#[async_trait]
impl Step for WaitGuestAddress {
    fn name(&self) -> &'static str {
        "wait-guest-address"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let resolver = Self::resolver(ctx);
        match resolver.resolve(&ctx.cancel).await {
            Ok(ip) => {
                ctx.put_generated("GuestAddress", ip.clone());
                ctx.guest_address = Some(ip);
                StepAction::Continue
            }
            Err(e) => ctx.fail(e),
        }
    }
}
