use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use typed_builder::TypedBuilder;

/// The network context of a span: the service that recorded it, or the peer
/// it talked to.
#[derive(TypedBuilder, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) service_name: Option<String>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) ipv4: Option<Ipv4Addr>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) ipv6: Option<Ipv6Addr>,
    #[builder(setter(strip_option), default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) port: Option<u16>,
}

impl Endpoint {
    /// Builds an endpoint from whichever parts are known, or `None` when
    /// every part is unset.
    pub fn from_parts(
        service_name: Option<String>,
        ip: Option<IpAddr>,
        port: Option<u16>,
    ) -> Option<Endpoint> {
        if service_name.is_none() && ip.is_none() && port.is_none() {
            return None;
        }
        let (ipv4, ipv6) = match ip {
            Some(IpAddr::V4(v4)) => (Some(v4), None),
            Some(IpAddr::V6(v6)) => (None, Some(v6)),
            None => (None, None),
        };
        Some(Endpoint {
            service_name,
            ipv4,
            ipv6,
            port,
        })
    }
}
