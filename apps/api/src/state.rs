use std::sync::Arc;

use crate::attachments::AttachmentLinker;
use crate::config::Config;
use crate::crm::CrmBackend;
use crate::matching::MatchResolver;
use crate::negotiation::FormatNegotiator;
use crate::reconcile::Reconciler;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// CRM backend. Default: EspoClient over reqwest.
    pub crm: Arc<dyn CrmBackend>,
    pub reconciler: Reconciler,
    pub resolver: MatchResolver,
    pub negotiator: FormatNegotiator,
    pub linker: AttachmentLinker,
}

impl AppState {
    /// Wires every component to the same CRM backend.
    pub fn new(crm: Arc<dyn CrmBackend>, config: &Config) -> Self {
        let resolver = MatchResolver::new(crm.clone());
        let negotiator = FormatNegotiator::new(crm.clone(), config.international_phones);
        Self {
            reconciler: Reconciler::new(crm.clone(), resolver.clone(), negotiator.clone()),
            linker: AttachmentLinker::new(crm.clone()),
            negotiator,
            resolver,
            crm,
        }
    }
}
