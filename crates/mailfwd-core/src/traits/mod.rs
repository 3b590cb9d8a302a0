//! Capability interfaces over the external systems
//!
//! - [`DnsProvider`]: hosted zones and record sets
//! - [`MailRoutingService`]: domains, credentials and address routes
//! - [`FunctionHost`]: deploys the mail-gateway configuration blob

pub mod dns_provider;
pub mod function_host;
pub mod mail_routing;

pub use dns_provider::{
    Change, ChangeAction, ChangeId, ChangeStatus, DnsProvider, DnsProviderFactory, HostedZone,
    ObservedRecord, RecordSet, RecordType, ZoneCreation,
};
pub use function_host::{FileFunctionHost, FunctionHost};
pub use mail_routing::{
    DomainRegistration, DomainState, DomainSummary, MailRoutingFactory, MailRoutingService,
    ReceivingRecord, RoutingDomain, SendingRecord, SmtpCredential, SpamAction,
};
