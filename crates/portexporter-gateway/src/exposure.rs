use portexporter_proto::NETWORK_TCP;
use portexporter_tunnel::Authorizer;
use std::collections::HashSet;

/// What an empty exposure set means
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyExposure {
    /// Every TCP address may be dialed
    #[default]
    AllowAll,
    /// Nothing may be dialed
    DenyAll,
}

/// Set of local addresses the relay is allowed to dial through this gateway
#[derive(Debug, Clone)]
pub struct ExposurePolicy {
    addresses: HashSet<String>,
    empty: EmptyExposure,
}

impl ExposurePolicy {
    pub fn new<I, S>(addresses: I, empty: EmptyExposure) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            empty,
        }
    }

    /// Whether a dial to `address` over `protocol` is permitted
    ///
    /// Only `tcp` is ever allowed. With an empty address set the decision
    /// falls back to the configured [`EmptyExposure`].
    pub fn allow(&self, protocol: &str, address: &str) -> bool {
        tracing::debug!("Received request to {}://{}", protocol, address);

        if protocol != NETWORK_TCP {
            return false;
        }

        if self.addresses.is_empty() {
            return self.empty == EmptyExposure::AllowAll;
        }

        self.addresses.contains(address)
    }

    /// True when every TCP address is reachable through this gateway
    pub fn is_open(&self) -> bool {
        self.addresses.is_empty() && self.empty == EmptyExposure::AllowAll
    }

    /// Exposed addresses, sorted
    pub fn addresses(&self) -> Vec<&str> {
        let mut addresses: Vec<&str> = self.addresses.iter().map(String::as_str).collect();
        addresses.sort_unstable();
        addresses
    }
}

impl Authorizer for ExposurePolicy {
    fn authorize(&self, network: &str, address: &str) -> bool {
        self.allow(network, address)
    }
}
