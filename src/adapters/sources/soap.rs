//! Paged SOAP 1.1 services
//!
//! Each page is one POST of a SOAP envelope whose body is the configured
//! template with `{offset}` and `{limit}` filled in. Paging stops at the
//! first page holding fewer than `page_size` records.
//!
//! Inside each record element, child elements become dotted field names
//! (`Address.City`) and attributes become `@name` fields. A repeated
//! element turns into an array.

use super::traits::{build_records, unsupported_cursor, DecodedItem, SourceAdapter};
use crate::adapters::http::{build_client, request_error, status_error};
use crate::config::{SecretString, SoapSourceConfig};
use crate::domain::{FieldMap, ProvisionalRecord, RawChunk, SourceCursor, SourceError, SourceId};
use async_trait::async_trait;
use bytes::Bytes;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::sync::Arc;

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const PASSWORD_TEXT: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";

/// Raw HTTP response of one SOAP call
#[derive(Debug, Clone)]
pub struct SoapResponse {
    pub status: u16,
    pub body: String,
}

/// Sends SOAP envelopes
#[async_trait]
pub trait SoapTransport: Send + Sync {
    /// POSTs `envelope`; only failures without a response are errors
    async fn call(&self, action: &str, envelope: String) -> Result<SoapResponse, SourceError>;
}

/// reqwest-backed transport
pub struct HttpSoapTransport {
    client: Client,
    endpoint: String,
}

impl HttpSoapTransport {
    pub fn new(endpoint: &str, timeout_seconds: u64) -> Result<Self, SourceError> {
        Ok(Self {
            client: build_client(timeout_seconds)?,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl SoapTransport for HttpSoapTransport {
    async fn call(&self, action: &str, envelope: String) -> Result<SoapResponse, SourceError> {
        let context = format!("SOAP {} {}", action, self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", format!("\"{action}\""))
            .body(envelope)
            .send()
            .await
            .map_err(|e| request_error(&context, e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SourceError::transient(format!("{context}: {e}")))?;
        Ok(SoapResponse { status, body })
    }
}

/// A SOAP fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    pub code: String,
    pub reason: String,
}

impl SoapFault {
    /// Server-side faults may clear up on retry; client faults will not
    pub fn is_transient(&self) -> bool {
        let local = self.code.rsplit(':').next().unwrap_or(&self.code);
        matches!(local, "Server" | "Receiver")
    }

    fn into_error(self) -> SourceError {
        let message = format!("SOAP fault {}: {}", self.code, self.reason);
        if self.is_transient() {
            SourceError::transient(message)
        } else {
            SourceError::fatal(message)
        }
    }
}

pub struct SoapSource {
    source_id: SourceId,
    transport: Arc<dyn SoapTransport>,
    soap_action: String,
    body_template: String,
    record_element: String,
    page_size: u64,
    username: Option<String>,
    password: Option<SecretString>,
    offset: u64,
    exhausted: bool,
}

impl SoapSource {
    pub fn new(source_id: SourceId, config: &SoapSourceConfig) -> Result<Self, SourceError> {
        let transport = HttpSoapTransport::new(&config.endpoint, config.timeout_seconds)?;
        Ok(Self::with_transport(source_id, config, Arc::new(transport)))
    }

    pub fn with_transport(
        source_id: SourceId,
        config: &SoapSourceConfig,
        transport: Arc<dyn SoapTransport>,
    ) -> Self {
        Self {
            source_id,
            transport,
            soap_action: config.soap_action.clone(),
            body_template: config.body_template.clone(),
            record_element: config.record_element.clone(),
            page_size: config.page_size,
            username: config.username.clone(),
            password: config.password.clone(),
            offset: 0,
            exhausted: false,
        }
    }

    fn envelope(&self, offset: u64) -> String {
        let body = self
            .body_template
            .replace("{offset}", &offset.to_string())
            .replace("{limit}", &self.page_size.to_string());

        let header = match (&self.username, &self.password) {
            (Some(username), Some(password)) => format!(
                "<soap:Header><wsse:Security xmlns:wsse=\"{WSSE_NS}\"><wsse:UsernameToken>\
                 <wsse:Username>{}</wsse:Username>\
                 <wsse:Password Type=\"{PASSWORD_TEXT}\">{}</wsse:Password>\
                 </wsse:UsernameToken></wsse:Security></soap:Header>",
                escape(username.as_str()),
                escape(password.expose_secret().as_str())
            ),
            _ => String::new(),
        };

        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <soap:Envelope xmlns:soap=\"{SOAP_ENV_NS}\">{header}<soap:Body>{body}</soap:Body></soap:Envelope>"
        )
    }
}

#[async_trait]
impl SourceAdapter for SoapSource {
    fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    fn kind(&self) -> &'static str {
        "soap"
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<RawChunk>, SourceError> {
        if self.exhausted {
            return Ok(None);
        }

        let response = self
            .transport
            .call(&self.soap_action, self.envelope(self.offset))
            .await?;

        if let Some(fault) = parse_fault(&response.body) {
            return Err(fault.into_error());
        }
        let status = StatusCode::from_u16(response.status)
            .map_err(|_| SourceError::fatal(format!("invalid HTTP status {}", response.status)))?;
        if !status.is_success() {
            return Err(status_error(
                &format!("SOAP {}", self.soap_action),
                status,
                &response.body,
            ));
        }

        let count = parse_records(&response.body, &self.record_element)
            .map_err(|e| SourceError::fatal(format!("Unreadable SOAP response: {e}")))?
            .len() as u64;

        let start = SourceCursor::Page {
            offset: self.offset,
        };
        if count < self.page_size {
            self.exhausted = true;
        }
        if count == 0 {
            return Ok(None);
        }
        self.offset += count;
        tracing::debug!(source_id = %self.source_id, offset = self.offset, records = count, "Fetched SOAP page");

        Ok(Some(RawChunk::new(
            self.source_id.clone(),
            start,
            self.checkpoint(),
            Bytes::from(response.body),
        )))
    }

    fn checkpoint(&self) -> SourceCursor {
        if self.offset == 0 {
            SourceCursor::Start
        } else {
            SourceCursor::Page {
                offset: self.offset,
            }
        }
    }

    fn resume(&mut self, cursor: SourceCursor) -> Result<(), SourceError> {
        self.offset = match cursor {
            SourceCursor::Start => 0,
            SourceCursor::Page { offset } => offset,
            other => return Err(unsupported_cursor("soap", &other)),
        };
        self.exhausted = false;
        Ok(())
    }

    fn decode(&self, chunk: &RawChunk) -> Vec<ProvisionalRecord> {
        let body = String::from_utf8_lossy(&chunk.bytes);
        let items: Vec<DecodedItem> = match parse_records(&body, &self.record_element) {
            Ok(records) => records.into_iter().map(Ok).collect(),
            // next() already parsed this body
            Err(e) => vec![Err(e)],
        };
        build_records(chunk, items)
    }
}

fn local_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.local_name().as_ref()).into_owned()
}

/// Inserts `value` under `key`, turning repeated keys into arrays
fn insert_field(fields: &mut FieldMap, key: String, value: Value) {
    match fields.get_mut(&key) {
        None => {
            fields.insert(key, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

fn add_attributes(fields: &mut FieldMap, prefix: &str, start: &BytesStart<'_>) -> Result<(), String> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = attr.key.local_name();
        let name = String::from_utf8_lossy(key.as_ref());
        if attr.key.as_ref().starts_with(b"xmlns") {
            continue;
        }
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        let field = if prefix.is_empty() {
            format!("@{name}")
        } else {
            format!("{prefix}.@{name}")
        };
        insert_field(fields, field, Value::String(value.into_owned()));
    }
    Ok(())
}

/// Field maps of every `record_element` in a SOAP response
pub(crate) fn parse_records(xml: &str, record_element: &str) -> Result<Vec<FieldMap>, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    // element path inside the current record; None outside records
    let mut path: Option<Vec<String>> = None;
    let mut fields = FieldMap::new();
    let mut text = String::new();

    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(e) => {
                let name = local_name(&e);
                match path.as_mut() {
                    None if name == record_element => {
                        fields = FieldMap::new();
                        text.clear();
                        add_attributes(&mut fields, "", &e)?;
                        path = Some(Vec::new());
                    }
                    None => {}
                    Some(stack) => {
                        stack.push(name);
                        add_attributes(&mut fields, &stack.join("."), &e)?;
                        text.clear();
                    }
                }
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                match path.as_mut() {
                    None if name == record_element => {
                        let mut empty = FieldMap::new();
                        add_attributes(&mut empty, "", &e)?;
                        records.push(empty);
                    }
                    None => {}
                    Some(stack) => {
                        let key = if stack.is_empty() {
                            name
                        } else {
                            format!("{}.{}", stack.join("."), name)
                        };
                        add_attributes(&mut fields, &key, &e)?;
                        insert_field(&mut fields, key, Value::Null);
                    }
                }
            }
            Event::Text(e) => {
                if path.is_some() {
                    text.push_str(&e.unescape().map_err(|e| e.to_string())?);
                }
            }
            Event::CData(e) => {
                if path.is_some() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(_) => {
                if let Some(stack) = path.as_mut() {
                    match stack.pop() {
                        None => {
                            records.push(std::mem::take(&mut fields));
                            path = None;
                        }
                        Some(name) => {
                            if !text.is_empty() {
                                let key = if stack.is_empty() {
                                    name
                                } else {
                                    format!("{}.{}", stack.join("."), name)
                                };
                                insert_field(&mut fields, key, Value::String(std::mem::take(&mut text)));
                            }
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(records)
}

/// The fault in a SOAP 1.1 or 1.2 response, if any
pub(crate) fn parse_fault(xml: &str) -> Option<SoapFault> {
    if !xml.contains("Fault") {
        return None;
    }
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut in_fault = false;
    let mut code = String::new();
    let mut reason = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if name == "Fault" {
                    in_fault = true;
                }
                stack.push(name);
            }
            Ok(Event::Text(e)) if in_fault => {
                let value = e.unescape().ok()?.trim().to_string();
                let parent = stack.len().checked_sub(2).and_then(|i| stack.get(i));
                match (stack.last().map(String::as_str), parent.map(String::as_str)) {
                    (Some("faultcode"), _) | (Some("Value"), Some("Code")) if code.is_empty() => {
                        code = value
                    }
                    (Some("faultstring"), _) | (Some("Text"), Some("Reason")) if reason.is_empty() => {
                        reason = value
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                if stack.pop().as_deref() == Some("Fault") {
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    in_fault.then_some(SoapFault { code, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    fn config(endpoint: String, page_size: u64) -> SoapSourceConfig {
        SoapSourceConfig {
            endpoint,
            soap_action: "http://chr.example.dk/ListHerds".to_string(),
            body_template: "<ListHerds><Offset>{offset}</Offset><Limit>{limit}</Limit></ListHerds>"
                .to_string(),
            record_element: "Herd".to_string(),
            page_size,
            username: Some("svc".to_string()),
            password: Some(crate::config::secret_string("p<w>".to_string())),
            timeout_seconds: 5,
        }
    }

    fn page(first: u64, count: u64) -> String {
        let herds: String = (first..first + count)
            .map(|i| {
                format!(
                    "<chr:Herd status=\"active\"><chr:HerdNumber>{i}</chr:HerdNumber>\
                     <chr:Location><chr:X>500000,5</chr:X><chr:Y>6200000</chr:Y></chr:Location></chr:Herd>"
                )
            })
            .collect();
        format!(
            "<soap:Envelope xmlns:soap=\"{SOAP_ENV_NS}\"><soap:Body>\
             <chr:ListHerdsResponse xmlns:chr=\"urn:chr\">{herds}</chr:ListHerdsResponse>\
             </soap:Body></soap:Envelope>"
        )
    }

    /// Returns scripted responses in order
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<SoapResponse, SourceError>>>,
        envelopes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SoapTransport for ScriptedTransport {
        async fn call(&self, _action: &str, envelope: String) -> Result<SoapResponse, SourceError> {
            self.envelopes.lock().unwrap().push(envelope);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::fatal("no more responses")))
        }
    }

    fn ok(body: String) -> Result<SoapResponse, SourceError> {
        Ok(SoapResponse { status: 200, body })
    }

    #[test]
    fn test_parse_records_flattens_children() {
        let records = parse_records(&page(7, 2), "Herd").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["HerdNumber"], Value::String("7".to_string()));
        assert_eq!(records[0]["Location.X"], Value::String("500000,5".to_string()));
        assert_eq!(records[0]["@status"], Value::String("active".to_string()));
        assert_eq!(records[1]["HerdNumber"], Value::String("8".to_string()));
    }

    #[test]
    fn test_repeated_elements_become_arrays() {
        let xml = "<r><Herd><Owner>a</Owner><Owner>b</Owner><Note/></Herd></r>";
        let records = parse_records(xml, "Herd").unwrap();
        assert_eq!(records[0]["Owner"], serde_json::json!(["a", "b"]));
        assert_eq!(records[0]["Note"], Value::Null);
    }

    #[test]
    fn test_parse_fault_soap11_and_12() {
        let v11 = format!(
            "<soap:Envelope xmlns:soap=\"{SOAP_ENV_NS}\"><soap:Body><soap:Fault>\
             <faultcode>soap:Server</faultcode><faultstring>Database busy</faultstring>\
             </soap:Fault></soap:Body></soap:Envelope>"
        );
        let fault = parse_fault(&v11).unwrap();
        assert_eq!(fault.code, "soap:Server");
        assert_eq!(fault.reason, "Database busy");
        assert!(fault.is_transient());

        let v12 = "<env:Envelope xmlns:env=\"http://www.w3.org/2003/05/soap-envelope\"><env:Body>\
                   <env:Fault><env:Code><env:Value>env:Sender</env:Value></env:Code>\
                   <env:Reason><env:Text xml:lang=\"en\">Bad offset</env:Text></env:Reason>\
                   </env:Fault></env:Body></env:Envelope>";
        let fault = parse_fault(v12).unwrap();
        assert_eq!(fault.code, "env:Sender");
        assert!(!fault.is_transient());

        assert!(parse_fault(&page(0, 1)).is_none());
    }

    #[test]
    fn test_envelope_escapes_credentials() {
        let transport = Arc::new(ScriptedTransport {
            responses: Mutex::new(VecDeque::new()),
            envelopes: Mutex::new(Vec::new()),
        });
        let source = SoapSource::with_transport(
            SourceId::new("chr").unwrap(),
            &config("http://localhost".to_string(), 50),
            transport,
        );
        let envelope = source.envelope(100);
        assert!(envelope.contains("<Offset>100</Offset><Limit>50</Limit>"));
        assert!(envelope.contains("p&lt;w&gt;"));
        assert!(envelope.contains("<wsse:Username>svc</wsse:Username>"));
    }

    #[tokio::test]
    async fn test_pages_until_short_page() {
        let transport = Arc::new(ScriptedTransport {
            responses: Mutex::new(VecDeque::from(vec![ok(page(0, 2)), ok(page(2, 1))])),
            envelopes: Mutex::new(Vec::new()),
        });
        let mut source = SoapSource::with_transport(
            SourceId::new("chr").unwrap(),
            &config("http://localhost".to_string(), 2),
            transport.clone(),
        );
        source.open().await.unwrap();

        let first = source.next().await.unwrap().unwrap();
        assert_eq!(first.start, SourceCursor::Page { offset: 0 });
        assert_eq!(first.end, SourceCursor::Page { offset: 2 });
        assert_eq!(source.decode(&first).len(), 2);

        let second = source.next().await.unwrap().unwrap();
        assert_eq!(second.end, SourceCursor::Page { offset: 3 });
        assert!(source.next().await.unwrap().is_none());

        let envelopes = transport.envelopes.lock().unwrap();
        assert_eq!(envelopes.len(), 2);
        assert!(envelopes[1].contains("<Offset>2</Offset>"));
    }

    #[tokio::test]
    async fn test_failed_call_does_not_advance() {
        let transport = Arc::new(ScriptedTransport {
            responses: Mutex::new(VecDeque::from(vec![
                Err(SourceError::transient("connection reset")),
                ok(page(4, 2)),
            ])),
            envelopes: Mutex::new(Vec::new()),
        });
        let mut source = SoapSource::with_transport(
            SourceId::new("chr").unwrap(),
            &config("http://localhost".to_string(), 2),
            transport,
        );
        source.resume(SourceCursor::Page { offset: 4 }).unwrap();

        assert!(source.next().await.unwrap_err().is_transient());
        assert_eq!(source.checkpoint(), SourceCursor::Page { offset: 4 });
        let chunk = source.next().await.unwrap().unwrap();
        assert_eq!(chunk.start, SourceCursor::Page { offset: 4 });
        assert!(source.resume(SourceCursor::Stream { records: 1 }).is_err());
    }

    #[tokio::test]
    async fn test_http_transport_against_server() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/service")
            .match_header("soapaction", "\"http://chr.example.dk/ListHerds\"")
            .match_header("content-type", "text/xml; charset=utf-8")
            .with_status(200)
            .with_body(page(0, 1))
            .create_async()
            .await;

        let config = config(format!("{}/service", server.url()), 10);
        let mut source = SoapSource::new(SourceId::new("chr").unwrap(), &config).unwrap();
        let chunk = source.next().await.unwrap().unwrap();
        assert_eq!(source.decode(&chunk)[0].fields["HerdNumber"], serde_json::json!("0"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_fault_and_status_classification() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/fault")
            .with_status(500)
            .with_body(format!(
                "<soap:Envelope xmlns:soap=\"{SOAP_ENV_NS}\"><soap:Body><soap:Fault>\
                 <faultcode>soap:Client</faultcode><faultstring>Unknown operation</faultstring>\
                 </soap:Fault></soap:Body></soap:Envelope>"
            ))
            .create_async()
            .await;
        server
            .mock("POST", "/busy")
            .with_status(503)
            .with_body("try later")
            .create_async()
            .await;

        let mut faulting =
            SoapSource::new(SourceId::new("chr").unwrap(), &config(format!("{}/fault", server.url()), 10)).unwrap();
        let err = faulting.next().await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("Unknown operation"));

        let mut busy =
            SoapSource::new(SourceId::new("chr").unwrap(), &config(format!("{}/busy", server.url()), 10)).unwrap();
        assert!(busy.next().await.unwrap_err().is_transient());
    }
}
