pub mod capacity;
pub mod offer;
pub mod phase;
pub mod registration;
pub mod result;

pub use capacity::CapacityRecord;
pub use offer::{Offer, OfferCatalog, ProductPrice, SupplierId, SupplierOffer};
pub use phase::{
    AgentRole, Constellation, OutputKind, Phase, PhaseAgent, PhaseSignals, SuccessPredicate,
};
pub use registration::{Registration, RegistrationId};
pub use result::{PhaseResult, TimingSample};
