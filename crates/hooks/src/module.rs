use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use waygate_context::{HookAction, QueryContext};
use waygate_dns::{
    ClientSubnet, DnsRecord, DomainName, HeaderSnapshot, RecordType, ResponseCode, Transport,
};

/// Hook points that receive the full query context, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    Prerpz,
    Preresolve,
    Nxdomain,
    Nodata,
    Postresolve,
}

impl HookPoint {
    pub fn name(self) -> &'static str {
        match self {
            HookPoint::Prerpz => "prerpz",
            HookPoint::Preresolve => "preresolve",
            HookPoint::Nxdomain => "nxdomain",
            HookPoint::Nodata => "nodata",
            HookPoint::Postresolve => "postresolve",
        }
    }
}

/// Fast-path predicate run before any per-query state exists. Returning
/// false drops the query on the floor.
pub trait IpFilter: Send + Sync {
    fn allow(
        &self,
        remote: SocketAddr,
        local: SocketAddr,
        header: &HeaderSnapshot,
    ) -> anyhow::Result<bool>;
}

impl<F> IpFilter for F
where
    F: Fn(SocketAddr, SocketAddr, &HeaderSnapshot) -> anyhow::Result<bool> + Send + Sync,
{
    fn allow(
        &self,
        remote: SocketAddr,
        local: SocketAddr,
        header: &HeaderSnapshot,
    ) -> anyhow::Result<bool> {
        self(remote, local, header)
    }
}

/// Query identity handed to the classifier. No answer state exists yet,
/// so only network and question fields are available.
#[derive(Debug, Clone)]
pub struct TagQuery {
    pub remote: SocketAddr,
    pub local: SocketAddr,
    pub subnet: Option<ClientSubnet>,
    pub qname: DomainName,
    pub qtype: RecordType,
}

/// Routing tag plus optional per-type data, computed once per query
/// before resolution begins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDecision {
    pub tag: u32,
    pub per_type_data: Option<HashMap<u32, String>>,
}

impl TagDecision {
    pub fn tagged(tag: u32) -> Self {
        Self {
            tag,
            per_type_data: None,
        }
    }
}

pub trait TagClassifier: Send + Sync {
    fn classify(&self, query: &TagQuery) -> anyhow::Result<TagDecision>;
}

impl<F> TagClassifier for F
where
    F: Fn(&TagQuery) -> anyhow::Result<TagDecision> + Send + Sync,
{
    fn classify(&self, query: &TagQuery) -> anyhow::Result<TagDecision> {
        self(query)
    }
}

/// A callback bound to one of the context hook points.
pub trait QueryHook: Send + Sync {
    fn invoke(&self, ctx: &mut QueryContext) -> anyhow::Result<HookAction>;
}

impl<F> QueryHook for F
where
    F: Fn(&mut QueryContext) -> anyhow::Result<HookAction> + Send + Sync,
{
    fn invoke(&self, ctx: &mut QueryContext) -> anyhow::Result<HookAction> {
        self(ctx)
    }
}

/// One outgoing upstream query as the outquery hooks see it: the candidate
/// answer sequence for preoutquery, the received records for postoutquery.
#[derive(Debug)]
pub struct OutQueryContext {
    pub nameserver: SocketAddr,
    pub requestor: SocketAddr,
    pub qname: DomainName,
    pub qtype: RecordType,
    pub transport: Transport,
    pub records: Vec<DnsRecord>,
    pub rcode: ResponseCode,
}

impl OutQueryContext {
    pub fn new(
        nameserver: SocketAddr,
        requestor: SocketAddr,
        qname: DomainName,
        qtype: RecordType,
        transport: Transport,
    ) -> Self {
        Self {
            nameserver,
            requestor,
            qname,
            qtype,
            transport,
            records: Vec::new(),
            rcode: ResponseCode::NoError,
        }
    }

    pub fn with_records(mut self, records: Vec<DnsRecord>) -> Self {
        self.records = records;
        self
    }
}

pub trait OutQueryHook: Send + Sync {
    fn invoke(&self, out: &mut OutQueryContext) -> anyhow::Result<HookAction>;
}

impl<F> OutQueryHook for F
where
    F: Fn(&mut OutQueryContext) -> anyhow::Result<HookAction> + Send + Sync,
{
    fn invoke(&self, out: &mut OutQueryContext) -> anyhow::Result<HookAction> {
        self(out)
    }
}

/// The loaded policy module: zero or one callback per hook point, resolved
/// when the module is built. Read-only afterwards and shared across all
/// workers.
#[derive(Default)]
pub struct PolicyModule {
    name: String,
    ipfilter: Option<Arc<dyn IpFilter>>,
    gettag: Option<Arc<dyn TagClassifier>>,
    prerpz: Option<Arc<dyn QueryHook>>,
    preresolve: Option<Arc<dyn QueryHook>>,
    nxdomain: Option<Arc<dyn QueryHook>>,
    nodata: Option<Arc<dyn QueryHook>>,
    postresolve: Option<Arc<dyn QueryHook>>,
    preoutquery: Option<Arc<dyn OutQueryHook>>,
    postoutquery: Option<Arc<dyn OutQueryHook>>,
}

impl PolicyModule {
    pub fn builder(name: impl Into<String>) -> PolicyModuleBuilder {
        PolicyModuleBuilder {
            module: PolicyModule {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hook(&self, point: HookPoint) -> Option<&Arc<dyn QueryHook>> {
        match point {
            HookPoint::Prerpz => self.prerpz.as_ref(),
            HookPoint::Preresolve => self.preresolve.as_ref(),
            HookPoint::Nxdomain => self.nxdomain.as_ref(),
            HookPoint::Nodata => self.nodata.as_ref(),
            HookPoint::Postresolve => self.postresolve.as_ref(),
        }
    }

    pub fn ipfilter(&self) -> Option<&Arc<dyn IpFilter>> {
        self.ipfilter.as_ref()
    }

    pub fn gettag(&self) -> Option<&Arc<dyn TagClassifier>> {
        self.gettag.as_ref()
    }

    pub fn preoutquery(&self) -> Option<&Arc<dyn OutQueryHook>> {
        self.preoutquery.as_ref()
    }

    pub fn postoutquery(&self) -> Option<&Arc<dyn OutQueryHook>> {
        self.postoutquery.as_ref()
    }

    /// Whether any context hook is registered. When false the resolver can
    /// skip building a QueryContext for the query entirely.
    pub fn needs_query_context(&self) -> bool {
        self.prerpz.is_some()
            || self.preresolve.is_some()
            || self.nxdomain.is_some()
            || self.nodata.is_some()
            || self.postresolve.is_some()
    }
}

pub struct PolicyModuleBuilder {
    module: PolicyModule,
}

impl PolicyModuleBuilder {
    pub fn ipfilter(mut self, hook: impl IpFilter + 'static) -> Self {
        self.module.ipfilter = Some(Arc::new(hook));
        self
    }

    pub fn gettag(mut self, hook: impl TagClassifier + 'static) -> Self {
        self.module.gettag = Some(Arc::new(hook));
        self
    }

    pub fn prerpz(mut self, hook: impl QueryHook + 'static) -> Self {
        self.module.prerpz = Some(Arc::new(hook));
        self
    }

    pub fn preresolve(mut self, hook: impl QueryHook + 'static) -> Self {
        self.module.preresolve = Some(Arc::new(hook));
        self
    }

    pub fn nxdomain(mut self, hook: impl QueryHook + 'static) -> Self {
        self.module.nxdomain = Some(Arc::new(hook));
        self
    }

    pub fn nodata(mut self, hook: impl QueryHook + 'static) -> Self {
        self.module.nodata = Some(Arc::new(hook));
        self
    }

    pub fn postresolve(mut self, hook: impl QueryHook + 'static) -> Self {
        self.module.postresolve = Some(Arc::new(hook));
        self
    }

    pub fn preoutquery(mut self, hook: impl OutQueryHook + 'static) -> Self {
        self.module.preoutquery = Some(Arc::new(hook));
        self
    }

    pub fn postoutquery(mut self, hook: impl OutQueryHook + 'static) -> Self {
        self.module.postoutquery = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> PolicyModule {
        self.module
    }
}
