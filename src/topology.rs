//! Topology indexing
//!
//! Assigns canonical addresses to a device's discovered GATT tree and resolves addresses
//! back to native handles. Resolution always re-walks the *current* native attribute list
//! rather than consulting a cached map, so the computed index reflects the latest discovery
//! order even when the caller races a reconnect. Attribute counts are small, so the linear
//! walk costs nothing worth caching.

use std::collections::HashMap;

use uuid::Uuid;

use crate::addr::XAddr;
use crate::radio::GattHandle;

/// One discovery snapshot of a device's GATT tree.
///
/// Holds canonical addresses only, never native handles; it is rebuilt wholesale on every
/// discovery because native stacks do not guarantee duplicate-index stability across
/// reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Discovered services, in discovery order.
    pub services: Vec<ServiceRecord>,
}

/// One discovered service and the addresses of its characteristics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Canonical address of the service within the device.
    pub address: XAddr,
    /// Canonical addresses of the service's characteristics, in discovery order.
    pub characteristics: Vec<XAddr>,
}

/// Running per-UUID occurrence counter; yields `uuid:0` on first sight.
#[derive(Default)]
struct DupCounter(HashMap<Uuid, u32>);

impl DupCounter {
    fn next(&mut self, uuid: Uuid) -> XAddr {
        let index = self.0.entry(uuid).and_modify(|i| *i += 1).or_insert(0);
        XAddr::new(uuid, *index)
    }
}

/// Builds a snapshot from the native tree, in the order the native stack reported it.
pub(crate) fn index_services<S, C>(tree: &[(S, Vec<C>)]) -> Topology
where
    S: GattHandle,
    C: GattHandle,
{
    let mut services = DupCounter::default();
    Topology {
        services: tree
            .iter()
            .map(|(service, characteristics)| ServiceRecord {
                address: services.next(service.uuid()),
                characteristics: assign(characteristics),
            })
            .collect(),
    }
}

fn assign<H: GattHandle>(handles: &[H]) -> Vec<XAddr> {
    let mut counter = DupCounter::default();
    handles.iter().map(|h| counter.next(h.uuid())).collect()
}

/// Walks `handles` in discovery order, recomputing duplicate indices, and returns the
/// handle whose canonical address equals `addr`.
pub(crate) fn resolve<'a, H: GattHandle>(handles: &'a [H], addr: &XAddr) -> Option<&'a H> {
    let mut counter = DupCounter::default();
    for handle in handles {
        if counter.next(handle.uuid()) == *addr {
            return Some(handle);
        }
    }
    None
}

/// Inverse walk: computes the canonical address of `needle`, matching by UUID *and*
/// native instance identity.
pub(crate) fn reverse<H: GattHandle>(handles: &[H], needle: &H) -> Option<XAddr> {
    let mut counter = DupCounter::default();
    for handle in handles {
        let addr = counter.next(handle.uuid());
        if handle.uuid() == needle.uuid() && handle.instance_id() == needle.instance_id() {
            return Some(addr);
        }
    }
    None
}

/// Locates `needle` somewhere under `services` and returns the service and characteristic
/// addresses it maps to. Used to translate inbound native callbacks back to canonical form.
pub(crate) fn reverse_characteristic<S, C>(
    services: &[S],
    mut characteristics_of: impl FnMut(&S) -> Vec<C>,
    needle: &C,
) -> Option<(XAddr, XAddr)>
where
    S: GattHandle,
    C: GattHandle,
{
    let mut counter = DupCounter::default();
    for service in services {
        let service_addr = counter.next(service.uuid());
        if let Some(char_addr) = reverse(&characteristics_of(service), needle) {
            return Some((service_addr, char_addr));
        }
    }
    None
}
