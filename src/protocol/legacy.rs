use crate::address::Address;
use crate::algorithms::LeastHops;
use crate::message::Message;
use crate::protocol::{ProtocolInterface, ProtocolKind, RouteData, RoutingContext};

/// Routes on the live truth graph. The fallback of last resort.
#[derive(Debug, Clone, Default)]
pub struct Legacy;

impl ProtocolInterface for Legacy {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Legacy
    }

    fn routing(&self, ctx: &RoutingContext<'_>, xmtr: Address, message: &Message) -> Option<RouteData> {
        let result = ctx
            .manager()
            .graph()
            .find_path(&xmtr, &message.destination(), &LeastHops)?;
        RouteData::from_path(result.path, result.cost)
    }
}
