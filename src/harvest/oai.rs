//! OAI-PMH `ListRecords` client.
//!
//! One HTTP GET per [`ListCursor`]; the pipeline follows resumption tokens.
//! Protocol errors are mapped onto [`ListOutcome`] so that `noRecordsMatch`
//! stays distinguishable from real failures.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use url::Url;

use crate::harvest::traits::{ListCursor, ListOutcome, ProtocolError, RecordPage, RecordSource};
use crate::harvest::xml::{parse_document, XmlElement};
use crate::model::RawRecord;

/// OAI-PMH error code for an empty result set.
pub const NO_RECORDS_MATCH: &str = "noRecordsMatch";

/// Longest response excerpt kept in an HTTP error.
const MAX_ERROR_BODY: usize = 500;

pub struct OaiClient {
    client: reqwest::Client,
}

impl OaiClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, ProtocolError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, endpoint: &str, cursor: &ListCursor) -> Result<String, ProtocolError> {
        let url = Url::parse_with_params(endpoint, cursor.query_pairs())
            .map_err(|_| ProtocolError::InvalidEndpoint(endpoint.to_string()))?;
        debug!(url = %url, "Fetching record page");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProtocolError::Http {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        resp.text()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))
    }
}

#[async_trait]
impl RecordSource for OaiClient {
    async fn list_records(&self, endpoint: &str, cursor: &ListCursor) -> ListOutcome {
        match self.fetch(endpoint, cursor).await {
            Ok(body) => parse_list_response(&body),
            Err(e) => ListOutcome::Failed(e),
        }
    }

    fn source_name(&self) -> &'static str {
        "oai-pmh"
    }
}

/// Interprets a `ListRecords` response body.
pub fn parse_list_response(body: &str) -> ListOutcome {
    let root = match parse_document(body) {
        Ok(root) => root,
        Err(e) => return ListOutcome::Failed(ProtocolError::InvalidResponse(e.to_string())),
    };
    if root.name != "OAI-PMH" {
        return ListOutcome::Failed(ProtocolError::InvalidResponse(format!(
            "unexpected root element <{}>",
            root.name
        )));
    }

    if let Some(error) = root.child("error") {
        let code = error.attr("code").unwrap_or_default();
        if code == NO_RECORDS_MATCH {
            return ListOutcome::Empty;
        }
        return ListOutcome::Failed(ProtocolError::Oai {
            code: code.to_string(),
            message: error.text.clone(),
        });
    }

    let Some(list) = root.child("ListRecords") else {
        return ListOutcome::Failed(ProtocolError::InvalidResponse(
            "missing <ListRecords>".to_string(),
        ));
    };

    let records = list.children_named("record").filter_map(parse_record).collect();
    let resumption_token = list
        .child_text("resumptionToken")
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    ListOutcome::Page(RecordPage {
        records,
        resumption_token,
    })
}

fn parse_record(el: &XmlElement) -> Option<RawRecord> {
    let header = el.child("header");
    let identifier = header
        .and_then(|h| h.child_text("identifier"))
        .filter(|id| !id.is_empty());

    let (Some(header), Some(identifier)) = (header, identifier) else {
        warn!("Skipping record without header identifier");
        return None;
    };

    Some(RawRecord {
        identifier: identifier.to_string(),
        deleted: header.attr("status") == Some("deleted"),
        datestamp: header.child_text("datestamp").map(str::to_string),
        set_specs: header
            .children_named("setSpec")
            .map(|s| s.text.clone())
            .collect(),
        metadata: el.children_named("metadata").cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE_ONE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/">
  <responseDate>2024-01-01T00:00:00Z</responseDate>
  <request verb="ListRecords">https://example.org/oai</request>
  <ListRecords>
    <record>
      <header>
        <identifier>oai:example.org:1</identifier>
        <datestamp>2023-12-01</datestamp>
        <setSpec>books</setSpec>
      </header>
      <metadata>
        <oai_dc:dc xmlns:oai_dc="http://www.openarchives.org/OAI/2.0/oai_dc/"
                   xmlns:dc="http://purl.org/dc/elements/1.1/">
          <dc:title>First</dc:title>
        </oai_dc:dc>
      </metadata>
    </record>
    <record>
      <header status="deleted">
        <identifier>oai:example.org:2</identifier>
        <datestamp>2023-12-02</datestamp>
      </header>
    </record>
    <record><header><datestamp>2023-12-03</datestamp></header></record>
    <resumptionToken cursor="0" completeListSize="3">token-1</resumptionToken>
  </ListRecords>
</OAI-PMH>"#;

    const PAGE_TWO: &str = r#"<OAI-PMH><ListRecords>
    <record><header><identifier>oai:example.org:3</identifier></header>
      <metadata><oai_dc:dc xmlns:oai_dc="x"><dc:title xmlns:dc="y">Third</dc:title></oai_dc:dc></metadata>
    </record>
    <resumptionToken cursor="2" completeListSize="3"/>
  </ListRecords></OAI-PMH>"#;

    const NO_MATCH: &str = r#"<OAI-PMH><error code="noRecordsMatch">No matching records</error></OAI-PMH>"#;

    #[test]
    fn test_parse_page_with_deleted_record_and_token() {
        let ListOutcome::Page(page) = parse_list_response(PAGE_ONE) else {
            panic!("expected a page");
        };
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].identifier, "oai:example.org:1");
        assert!(!page.records[0].deleted);
        assert_eq!(page.records[0].set_specs, vec!["books".to_string()]);
        assert_eq!(page.records[0].metadata.len(), 1);
        assert!(page.records[1].deleted);
        assert!(page.records[1].metadata.is_empty());
        assert_eq!(page.resumption_token.as_deref(), Some("token-1"));
    }

    #[test]
    fn test_empty_token_ends_listing() {
        let ListOutcome::Page(page) = parse_list_response(PAGE_TWO) else {
            panic!("expected a page");
        };
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.resumption_token, None);
    }

    #[test]
    fn test_protocol_errors() {
        assert!(matches!(parse_list_response(NO_MATCH), ListOutcome::Empty));
        assert!(matches!(
            parse_list_response(
                r#"<OAI-PMH><error code="badArgument">Illegal from</error></OAI-PMH>"#
            ),
            ListOutcome::Failed(ProtocolError::Oai { ref code, .. }) if code == "badArgument"
        ));
        assert!(matches!(
            parse_list_response("<html><body>Gateway</body></html>"),
            ListOutcome::Failed(ProtocolError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_list_response("<OAI-PMH><ListRecords>"),
            ListOutcome::Failed(ProtocolError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_client_sends_listing_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oai"))
            .and(query_param("verb", "ListRecords"))
            .and(query_param("metadataPrefix", "oai_dc"))
            .and(query_param("set", "books"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_ONE))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/oai"))
            .and(query_param("resumptionToken", "token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_TWO))
            .expect(1)
            .mount(&server)
            .await;

        let client = OaiClient::new("test-agent", Duration::from_secs(5)).unwrap();
        let endpoint = format!("{}/oai", server.uri());

        let start = ListCursor::Start {
            metadata_prefix: "oai_dc".to_string(),
            from: None,
            set: Some("books".to_string()),
        };
        let ListOutcome::Page(first) = client.list_records(&endpoint, &start).await else {
            panic!("expected first page");
        };
        let token = first.resumption_token.unwrap();

        let ListOutcome::Page(second) = client
            .list_records(&endpoint, &ListCursor::Resume(token))
            .await
        else {
            panic!("expected second page");
        };
        assert_eq!(second.records[0].identifier, "oai:example.org:3");
    }

    #[tokio::test]
    async fn test_client_maps_http_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = OaiClient::new("test-agent", Duration::from_secs(5)).unwrap();
        let cursor = ListCursor::Resume("t".to_string());
        match client.list_records(&server.uri(), &cursor).await {
            ListOutcome::Failed(ProtocolError::Http { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_rejects_invalid_endpoint() {
        let client = OaiClient::new("test-agent", Duration::from_secs(5)).unwrap();
        let cursor = ListCursor::Resume("t".to_string());
        assert!(matches!(
            client.list_records("not a url", &cursor).await,
            ListOutcome::Failed(ProtocolError::InvalidEndpoint(_))
        ));
    }
}
