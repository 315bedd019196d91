use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use waygate_dns::{
    ClientSubnet, DnsRecord, DomainName, EdnsFlags, EdnsOption, HeaderSnapshot, OPT_CLIENT_SUBNET,
    RecordData, RecordPlace, RecordType, ResponseCode, Transport,
};

pub mod policy;

pub use policy::{AppliedPolicy, PolicyKind};

/// TTL applied to hook-added records that don't specify one.
pub const DEFAULT_RECORD_TTL: u32 = 3600;

/// Verdict returned by a hook callback: whether this point produced the
/// final answer for the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// The point did not answer; the pipeline proceeds unchanged.
    Continue,
    /// The rcode and record sequence on the context are the final answer.
    Answered,
}

impl HookAction {
    pub fn handled(self) -> bool {
        self == HookAction::Answered
    }
}

/// Continuation invoked with the context once the side answer is in.
pub type ResumeFn = Box<dyn FnOnce(&mut QueryContext) -> anyhow::Result<HookAction> + Send>;

/// A side query a hook has submitted but the engine has not yet flushed.
pub struct PendingSideQuery {
    pub dest: SocketAddr,
    pub payload: Bytes,
    pub resume: ResumeFn,
}

impl fmt::Debug for PendingSideQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSideQuery")
            .field("dest", &self.dest)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ContextError {
    /// At most one side query may be outstanding per query.
    #[error("a side query is already pending for this query")]
    SideQueryPending,
}

/// The identity of an inbound client query, captured before any hook runs.
/// Everything here is immutable for the lifetime of the query.
#[derive(Debug, Clone)]
pub struct InboundQuery {
    pub qname: DomainName,
    pub qtype: RecordType,
    pub transport: Transport,
    pub remote: SocketAddr,
    pub local: SocketAddr,
    pub header: HeaderSnapshot,
    pub edns_options: Vec<EdnsOption>,
    pub edns_flags: EdnsFlags,
}

impl InboundQuery {
    pub fn new(
        qname: DomainName,
        qtype: RecordType,
        transport: Transport,
        remote: SocketAddr,
        local: SocketAddr,
    ) -> Self {
        Self {
            qname,
            qtype,
            transport,
            remote,
            local,
            header: HeaderSnapshot::default(),
            edns_options: Vec::new(),
            edns_flags: EdnsFlags::empty(),
        }
    }

    pub fn with_header(mut self, header: HeaderSnapshot) -> Self {
        self.header = header;
        self
    }

    pub fn with_edns_options(mut self, options: Vec<EdnsOption>) -> Self {
        self.edns_options = options;
        self
    }

    pub fn with_edns_flags(mut self, flags: EdnsFlags) -> Self {
        self.edns_flags = flags;
        self
    }

    /// The raw value of a specific EDNS option, if the query carried it.
    pub fn edns_option(&self, code: u16) -> Option<&Bytes> {
        self.edns_options
            .iter()
            .find(|opt| opt.code == code)
            .map(|opt| &opt.data)
    }

    /// The client subnet the query carried, if any. Malformed options are
    /// treated as absent.
    pub fn client_subnet(&self) -> Option<ClientSubnet> {
        let data = self.edns_option(OPT_CLIENT_SUBNET)?;
        ClientSubnet::parse(data).ok()
    }
}

/// Per-query record handed to hook callbacks. One instance per in-flight
/// query, owned by the resolution worker driving it; callbacks only ever
/// borrow it for the duration of one invocation.
#[derive(Debug)]
pub struct QueryContext {
    query: InboundQuery,
    tag: u32,
    per_type_data: Option<HashMap<u32, String>>,

    records: Vec<DnsRecord>,
    rcode: ResponseCode,
    applied_policy: Option<AppliedPolicy>,
    policy_tags: Vec<String>,
    discarded_policies: HashMap<String, bool>,
    variable: bool,
    wants_rpz: bool,
    data: HashMap<String, String>,

    subnet: OnceCell<Option<ClientSubnet>>,

    side_query: Option<PendingSideQuery>,
    side_answer: Option<Bytes>,

    cancel: CancellationToken,
}

impl QueryContext {
    pub fn new(
        query: InboundQuery,
        tag: u32,
        per_type_data: Option<HashMap<u32, String>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            query,
            tag,
            per_type_data,
            records: Vec::new(),
            rcode: ResponseCode::NoError,
            applied_policy: None,
            policy_tags: Vec::new(),
            discarded_policies: HashMap::new(),
            variable: false,
            wants_rpz: false,
            data: HashMap::new(),
            subnet: OnceCell::new(),
            side_query: None,
            side_answer: None,
            cancel,
        }
    }

    // --- immutable identity ---

    pub fn query(&self) -> &InboundQuery {
        &self.query
    }

    pub fn qname(&self) -> &DomainName {
        &self.query.qname
    }

    pub fn qtype(&self) -> RecordType {
        self.query.qtype
    }

    pub fn transport(&self) -> Transport {
        self.query.transport
    }

    pub fn remote(&self) -> SocketAddr {
        self.query.remote
    }

    pub fn local(&self) -> SocketAddr {
        self.query.local
    }

    /// The header as it arrived. Snapshots are value copies; repeated reads
    /// are always equal.
    pub fn header(&self) -> HeaderSnapshot {
        self.query.header
    }

    pub fn edns_options(&self) -> &[EdnsOption] {
        &self.query.edns_options
    }

    pub fn edns_option(&self, code: u16) -> Option<&Bytes> {
        self.query.edns_option(code)
    }

    /// Client subnet, parsed once and cached.
    pub fn edns_subnet(&self) -> Option<&ClientSubnet> {
        self.subnet
            .get_or_init(|| self.query.client_subnet())
            .as_ref()
    }

    pub fn edns_flags(&self) -> EdnsFlags {
        self.query.edns_flags
    }

    pub fn edns_flag_names(&self) -> Vec<&'static str> {
        self.query.edns_flags.names()
    }

    pub fn has_edns_flag(&self, name: &str) -> bool {
        EdnsFlags::by_name(name).is_some_and(|flag| self.query.edns_flags.contains(flag))
    }

    // --- classification ---

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn per_type_data(&self) -> Option<&HashMap<u32, String>> {
        self.per_type_data.as_ref()
    }

    // --- answer state ---

    pub fn records(&self) -> &[DnsRecord] {
        &self.records
    }

    /// Replace the whole pending record sequence.
    pub fn set_records(&mut self, records: Vec<DnsRecord>) {
        self.records = records;
    }

    /// Append a record built from textual content into the given section.
    pub fn add_record(
        &mut self,
        rtype: RecordType,
        content: &str,
        place: RecordPlace,
        ttl: Option<u32>,
        name: Option<DomainName>,
    ) -> anyhow::Result<()> {
        let record = DnsRecord::new(
            name.unwrap_or_else(|| self.query.qname.clone()),
            rtype,
            ttl.unwrap_or(DEFAULT_RECORD_TTL),
            place,
            RecordData::parse(rtype, content)?,
        );
        self.records.push(record);
        Ok(())
    }

    /// Append an answer-section record; owner defaults to the query name.
    pub fn add_answer(
        &mut self,
        rtype: RecordType,
        content: &str,
        ttl: Option<u32>,
        name: Option<DomainName>,
    ) -> anyhow::Result<()> {
        self.add_record(rtype, content, RecordPlace::Answer, ttl, name)
    }

    pub fn rcode(&self) -> ResponseCode {
        self.rcode
    }

    pub fn set_rcode(&mut self, rcode: ResponseCode) {
        self.rcode = rcode;
    }

    // --- policy state ---

    pub fn applied_policy(&self) -> Option<&AppliedPolicy> {
        self.applied_policy.as_ref()
    }

    /// Override the applied policy. Overriding is explicit; there is no way
    /// to revert to an earlier value.
    pub fn set_applied_policy(&mut self, policy: AppliedPolicy) {
        self.applied_policy = Some(policy);
    }

    pub fn policy_tags(&self) -> &[String] {
        &self.policy_tags
    }

    /// Tags are append-only; earlier entries are never removed.
    pub fn add_policy_tag(&mut self, tag: impl Into<String>) {
        self.policy_tags.push(tag.into());
    }

    pub fn discarded_policies(&self) -> &HashMap<String, bool> {
        &self.discarded_policies
    }

    /// Mark a named policy as discarded for this query.
    pub fn discard_policy(&mut self, name: impl Into<String>) {
        self.discarded_policies.insert(name.into(), true);
    }

    pub fn variable(&self) -> bool {
        self.variable
    }

    /// Mark the answer as varying per client, i.e. not safely cacheable.
    pub fn set_variable(&mut self, variable: bool) {
        self.variable = variable;
    }

    pub fn wants_rpz(&self) -> bool {
        self.wants_rpz
    }

    pub fn set_wants_rpz(&mut self, wants_rpz: bool) {
        self.wants_rpz = wants_rpz;
    }

    /// Free-form state shared between hook invocations on this query.
    pub fn data(&self) -> &HashMap<String, String> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.data
    }

    // --- continuation ---

    /// Submit a side query: send `payload` to `dest` and call `resume` with
    /// this context once the answer (or the empty failure sentinel) is in.
    /// Fails if a side query is already outstanding; the pending one is
    /// unaffected.
    pub fn submit_side_query(
        &mut self,
        dest: SocketAddr,
        payload: impl Into<Bytes>,
        resume: ResumeFn,
    ) -> Result<(), ContextError> {
        if self.side_query.is_some() {
            return Err(ContextError::SideQueryPending);
        }
        self.side_query = Some(PendingSideQuery {
            dest,
            payload: payload.into(),
            resume,
        });
        Ok(())
    }

    pub fn side_query_pending(&self) -> bool {
        self.side_query.is_some()
    }

    /// Engine side: pull the submitted side query for dispatch.
    pub fn take_side_query(&mut self) -> Option<PendingSideQuery> {
        self.side_query.take()
    }

    /// Engine side: store the side answer before running the continuation.
    pub fn set_side_answer(&mut self, answer: Bytes) {
        self.side_answer = Some(answer);
    }

    /// The raw side answer. Valid during the continuation call; empty means
    /// the side query failed or timed out.
    pub fn side_answer(&self) -> Option<&Bytes> {
        self.side_answer.as_ref()
    }

    /// Token fired when the owning query is abandoned.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    // --- teardown, for folding the context into the outgoing answer ---

    pub fn take_records(&mut self) -> Vec<DnsRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn take_policy_tags(&mut self) -> Vec<String> {
        std::mem::take(&mut self.policy_tags)
    }

    pub fn take_applied_policy(&mut self) -> Option<AppliedPolicy> {
        self.applied_policy.take()
    }
}
