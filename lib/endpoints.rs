use serde::Serialize;

/// Static mapping from a logical upstream data domain to its target table.
///
/// `conflict_columns` must be a subset of the unique-key field; today every registered
/// endpoint uses exactly its unique key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EndpointDescriptor {
    pub name: &'static str,
    pub table: &'static str,
    /// `None` disables duplicate filtering for the endpoint.
    pub unique_field: Option<&'static str>,
    pub conflict_columns: &'static [&'static str],
}

pub const MEMBER_DATA: EndpointDescriptor = EndpointDescriptor {
    name: "member_data",
    table: "members",
    unique_field: Some("member_id"),
    conflict_columns: &["member_id"],
};

pub const CALENDAR_DATA: EndpointDescriptor = EndpointDescriptor {
    name: "calendar_data",
    table: "calendar_events",
    unique_field: Some("event_id"),
    conflict_columns: &["event_id"],
};

pub const DOCUMENT_DATA: EndpointDescriptor = EndpointDescriptor {
    name: "document_data",
    table: "documents",
    unique_field: Some("document_id"),
    conflict_columns: &["document_id"],
};

pub const SPEECH_DATA: EndpointDescriptor = EndpointDescriptor {
    name: "speech_data",
    table: "speeches",
    unique_field: Some("speech_id"),
    conflict_columns: &["speech_id"],
};

pub const VOTE_DATA: EndpointDescriptor = EndpointDescriptor {
    name: "vote_data",
    table: "votes",
    unique_field: Some("vote_id"),
    conflict_columns: &["vote_id"],
};

pub const PARTY_DATA: EndpointDescriptor = EndpointDescriptor {
    name: "party_data",
    table: "parties",
    unique_field: Some("party_id"),
    conflict_columns: &["party_id"],
};

pub static ENDPOINTS: [EndpointDescriptor; 6] = [
    MEMBER_DATA,
    CALENDAR_DATA,
    DOCUMENT_DATA,
    SPEECH_DATA,
    VOTE_DATA,
    PARTY_DATA,
];

pub fn lookup(name: &str) -> Option<&'static EndpointDescriptor> {
    ENDPOINTS.iter().find(|endpoint| endpoint.name == name)
}
