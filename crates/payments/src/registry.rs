use std::collections::HashMap;
use std::sync::Arc;

use storefront_orders::PaymentProvider;

use crate::cod::CodGateway;
use crate::error::PaymentProviderError;
use crate::gateway::PaymentGateway;

/// Gateways by provider. COD is always present.
#[derive(Clone)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
}

impl Default for GatewayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayRegistry {
    pub fn new() -> Self {
        let mut gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>> = HashMap::new();
        gateways.insert(PaymentProvider::Cod, Arc::new(CodGateway));
        Self { gateways }
    }

    /// Register (or replace) the gateway for its provider.
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn get(&self, provider: PaymentProvider) -> Result<Arc<dyn PaymentGateway>, PaymentProviderError> {
        self.gateways
            .get(&provider)
            .cloned()
            .ok_or(PaymentProviderError::NotConfigured(provider))
    }

    pub fn providers(&self) -> Vec<PaymentProvider> {
        let mut providers: Vec<_> = self.gateways.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}

impl core::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
