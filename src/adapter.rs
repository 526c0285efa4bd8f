//! Request adapters: uniform dispatch over the URL scheme.
//!
//! Each adapter takes the declarative [`Request`], performs the exchange
//! and fills in a [`Response`] (synthesizing the HTTP-shaped fields for
//! pseudo-requests). `http`/`https` go through reqwest; `file://`,
//! `bash://` and `sql://` are executed locally.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::request::{first_header, ParamsAs, Request, Response, ValueMap};

/// Default timeout when the request does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_REDIRECTS: usize = 10;

#[derive(Error, Debug)]
pub enum AdapterError {
    /// Transport-level problem; the test becomes Error.
    #[error("{0}")]
    Transport(String),

    /// The request itself is unusable; the test becomes Bogus.
    #[error("{0}")]
    Bogus(String),
}

/// Build a client suitable for the engine. Redirects are followed by the
/// adapter itself (so the chain can be recorded); cookie continuity is
/// optional.
pub fn build_client(keep_cookies: bool) -> Result<reqwest::Client, AdapterError> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
    if keep_cookies {
        builder = builder.cookie_store(true);
    }
    builder
        .build()
        .map_err(|e| AdapterError::Transport(e.to_string()))
}

/// Named HTTP clients, one per pool identifier. Requests carrying a
/// `ClientPool` id share the pool's connections and cookie jar.
pub struct ClientPool {
    keep_cookies: bool,
    default: reqwest::Client,
    named: std::sync::Mutex<BTreeMap<String, reqwest::Client>>,
}

impl ClientPool {
    pub fn new(keep_cookies: bool) -> Result<Self, AdapterError> {
        Ok(ClientPool {
            keep_cookies,
            default: build_client(keep_cookies)?,
            named: std::sync::Mutex::new(BTreeMap::new()),
        })
    }

    /// The client for a pool id; an empty id selects the default client.
    pub fn client(&self, pool_id: &str) -> Result<reqwest::Client, AdapterError> {
        if pool_id.is_empty() {
            return Ok(self.default.clone());
        }
        let mut named = self
            .named
            .lock()
            .map_err(|e| AdapterError::Transport(e.to_string()))?;
        if let Some(client) = named.get(pool_id) {
            return Ok(client.clone());
        }
        let client = build_client(self.keep_cookies)?;
        named.insert(pool_id.to_string(), client.clone());
        Ok(client)
    }
}

/// Execute the request and capture the response. The scheme of the URL
/// selects the adapter.
pub async fn execute(request: &Request, client: &reqwest::Client) -> Result<Response, AdapterError> {
    let url = Url::parse(&request.url)
        .map_err(|e| AdapterError::Bogus(format!("bad URL {:?}: {}", request.url, e)))?;

    match url.scheme() {
        "http" | "https" => execute_http(request, client).await,
        "file" => execute_file(request, &url).await,
        "bash" => execute_bash(request, &url).await,
        "sql" => execute_sql(request, &url).await,
        other => Err(AdapterError::Bogus(format!(
            "unsupported URL scheme {:?}",
            other
        ))),
    }
}

// ---------------------------------------------------------------------------
// http(s)

async fn execute_http(
    request: &Request,
    client: &reqwest::Client,
) -> Result<Response, AdapterError> {
    let method: reqwest::Method = request
        .method_or_get()
        .parse()
        .map_err(|_| AdapterError::Bogus(format!("bad method {:?}", request.method)))?;

    info!(method = %method, url = %request.url, "sending request");
    let start = Instant::now();

    let mut current_url = request.url.clone();
    let mut redirections: Vec<String> = Vec::new();

    // Redirects are followed manually so the chain can be recorded.
    loop {
        let builder = build_http_request(request, client, method.clone(), &current_url)?;
        let result = builder.send().await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => return Err(AdapterError::Transport(e.to_string())),
        };

        let status = resp.status();
        if request.follow_redirects
            && status.is_redirection()
            && redirections.len() < MAX_REDIRECTS
        {
            if let Some(location) = resp.headers().get("location").and_then(|v| v.to_str().ok())
            {
                let base = Url::parse(&current_url)
                    .map_err(|e| AdapterError::Transport(e.to_string()))?;
                let next = base
                    .join(location)
                    .map_err(|e| AdapterError::Transport(e.to_string()))?;
                debug!(from = %current_url, to = %next, "following redirect");
                redirections.push(next.to_string());
                current_url = next.to_string();
                continue;
            }
        }

        let mut header = ValueMap::new();
        for (name, value) in resp.headers() {
            header
                .entry(name.to_string())
                .or_default()
                .push(value.to_str().unwrap_or("").to_string());
        }
        let proto = format!("{:?}", resp.version());
        let reason = status.canonical_reason().unwrap_or("");

        let (body, body_err) = match resp.bytes().await {
            Ok(b) => (b.to_vec(), None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        let duration = start.elapsed();
        debug!(status = status.as_u16(), ms = duration.as_millis() as u64, "received response");

        return Ok(Response {
            status_code: status.as_u16(),
            status: format!("{} {}", status.as_u16(), reason),
            proto,
            header,
            body,
            body_err,
            duration: Some(duration),
            redirections,
            request: request.clone(),
        });
    }
}

fn build_http_request(
    request: &Request,
    client: &reqwest::Client,
    method: reqwest::Method,
    url: &str,
) -> Result<reqwest::RequestBuilder, AdapterError> {
    let mut builder = client.request(method, url);

    for (name, values) in &request.header {
        for value in values {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    if !request.cookies.is_empty() {
        let cookie_header = request
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header("Cookie", cookie_header);
    }

    if let Some(auth) = &request.basic_auth {
        builder = builder.basic_auth(&auth.username, Some(&auth.password));
    }

    let params: Vec<(String, String)> = request
        .params
        .iter()
        .flat_map(|(k, vs)| vs.iter().map(move |v| (k.clone(), v.clone())))
        .collect();
    if !params.is_empty() {
        match request.params_as {
            ParamsAs::Url => builder = builder.query(&params),
            ParamsAs::Body => builder = builder.form(&params),
            ParamsAs::Multipart => {
                let mut form = reqwest::multipart::Form::new();
                for (k, v) in params {
                    form = form.text(k, v);
                }
                builder = builder.multipart(form);
            }
        }
    }

    if !request.body.is_empty() && request.params_as == ParamsAs::Url {
        builder = builder.body(request.body.clone());
    }

    builder = builder.timeout(request.timeout.unwrap_or(DEFAULT_TIMEOUT));
    Ok(builder)
}

// ---------------------------------------------------------------------------
// file://

async fn execute_file(request: &Request, url: &Url) -> Result<Response, AdapterError> {
    if let Some(host) = url.host_str() {
        if !host.is_empty() && host != "localhost" && host != "127.0.0.1" {
            return Err(AdapterError::Bogus(format!(
                "file:// on remote host {:?} not supported",
                host
            )));
        }
    }
    let path = PathBuf::from(url.path());
    let start = Instant::now();

    let (status_code, body): (u16, String) = match request.method_or_get() {
        "GET" => match tokio::fs::read_to_string(&path).await {
            Ok(content) => (200, content),
            Err(e) => (file_error_status(&e), e.to_string()),
        },
        "PUT" => match tokio::fs::write(&path, request.body.as_bytes()).await {
            Ok(()) => (200, format!("successfully wrote {}", path.display())),
            Err(e) => (file_error_status(&e), e.to_string()),
        },
        "DELETE" => match tokio::fs::remove_file(&path).await {
            Ok(()) => (200, format!("successfully deleted {}", path.display())),
            Err(e) => (file_error_status(&e), e.to_string()),
        },
        other => {
            return Err(AdapterError::Bogus(format!(
                "method {} not supported on file:// URL",
                other
            )))
        }
    };

    Ok(synthesize_response(
        request,
        status_code,
        ValueMap::new(),
        body.into_bytes(),
        start.elapsed(),
    ))
}

fn file_error_status(e: &std::io::Error) -> u16 {
    match e.kind() {
        ErrorKind::NotFound => 404,
        ErrorKind::PermissionDenied => 403,
        _ => 500,
    }
}

// ---------------------------------------------------------------------------
// bash://

async fn execute_bash(request: &Request, url: &Url) -> Result<Response, AdapterError> {
    if let Some(host) = url.host_str() {
        if !host.is_empty() && host != "localhost" && host != "127.0.0.1" {
            return Err(AdapterError::Bogus(format!(
                "bash:// on remote host {:?} not supported",
                host
            )));
        }
    }

    let workdir = if url.path().is_empty() { "." } else { url.path() };
    let timeout = request.timeout.unwrap_or(DEFAULT_TIMEOUT);
    let start = Instant::now();

    let mut cmd = tokio::process::Command::new("/bin/bash");
    cmd.arg("-c")
        .arg(&request.body)
        .current_dir(workdir)
        .kill_on_drop(true)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    for (name, values) in &request.params {
        if name.contains('=') {
            warn!(name = %name, "environment variable from Params contains '='; dropped");
            continue;
        }
        if let Some(value) = values.first() {
            cmd.env(name, value);
        }
    }

    let mut header = ValueMap::new();
    let (status_code, body) = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => {
            // The child is killed on drop.
            (408, String::from("script timed out"))
        }
        Ok(Err(e)) => return Err(AdapterError::Transport(e.to_string())),
        Ok(Ok(output)) => {
            let mut combined = output.stdout;
            combined.extend_from_slice(&output.stderr);
            let exit = output.status.code().unwrap_or(-1);
            header
                .entry("Exit-Status".to_string())
                .or_default()
                .push(format!("exit status {}", exit));
            let code = if output.status.success() { 200 } else { 500 };
            (code, String::from_utf8_lossy(&combined).into_owned())
        }
    };

    Ok(synthesize_response(
        request,
        status_code,
        header,
        body.into_bytes(),
        start.elapsed(),
    ))
}

// ---------------------------------------------------------------------------
// sql://

async fn execute_sql(request: &Request, url: &Url) -> Result<Response, AdapterError> {
    let driver = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| {
            AdapterError::Bogus("missing database driver name (host of URL) in sql query".into())
        })?;
    if driver != "sqlite" {
        return Err(AdapterError::Bogus(format!(
            "unsupported sql driver {:?}, only \"sqlite\" is available",
            driver
        )));
    }
    let dsn = first_header(&request.header, "Data-Source-Name")
        .ok_or_else(|| AdapterError::Bogus("missing Data-Source-Name header in sql query".into()))?
        .to_string();
    if request.body.is_empty() {
        return Err(AdapterError::Bogus(
            "missing query (request body) in sql query".into(),
        ));
    }

    let accept = first_header(&request.header, "Accept")
        .unwrap_or("application/json")
        .to_string();
    let query = request.body.clone();
    let method = request.method_or_get().to_string();
    let start = Instant::now();

    let body = tokio::task::spawn_blocking(move || -> Result<String, String> {
        let conn = rusqlite::Connection::open(&dsn).map_err(|e| e.to_string())?;
        match method.as_str() {
            "GET" => sql_query(&conn, &query, &accept),
            "POST" => sql_execute(&conn, &query),
            other => Err(format!("illegal method {} for sql query", other)),
        }
    })
    .await
    .map_err(|e| AdapterError::Transport(e.to_string()))?
    .map_err(AdapterError::Transport)?;

    Ok(synthesize_response(
        request,
        200,
        ValueMap::new(),
        body.into_bytes(),
        start.elapsed(),
    ))
}

fn sql_execute(conn: &rusqlite::Connection, query: &str) -> Result<String, String> {
    let rows_affected = conn.execute(query, []).map_err(|e| e.to_string())?;
    let result = serde_json::json!({
        "LastInsertId": { "Value": conn.last_insert_rowid() },
        "RowsAffected": { "Value": rows_affected },
    });
    serde_json::to_string_pretty(&result).map_err(|e| e.to_string())
}

fn sql_query(conn: &rusqlite::Connection, query: &str, accept: &str) -> Result<String, String> {
    let mut stmt = conn.prepare(query).map_err(|e| e.to_string())?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt.query([]).map_err(|e| e.to_string())?;
    let mut records: Vec<Vec<String>> = Vec::new();
    while let Some(row) = rows.next().map_err(|e| e.to_string())? {
        let mut record = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let value: rusqlite::types::Value = row.get(i).map_err(|e| e.to_string())?;
            record.push(sql_value_to_string(value));
        }
        records.push(record);
    }

    let (mediatype, params) = parse_accept(accept);
    let show_header = matches!(
        params.get("header").map(|s| s.as_str()),
        Some("present") | Some("true") | Some("yes")
    );

    match mediatype.as_str() {
        "text/plain" => {
            let sep = params
                .get("fieldsep")
                .cloned()
                .unwrap_or_else(|| "\t".to_string());
            let mut lines = Vec::new();
            if show_header {
                lines.push(columns.join(&sep));
            }
            for record in &records {
                lines.push(record.join(&sep));
            }
            Ok(lines.join("\n"))
        }
        "text/csv" => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            if show_header {
                writer.write_record(&columns).map_err(|e| e.to_string())?;
            }
            for record in &records {
                writer.write_record(record).map_err(|e| e.to_string())?;
            }
            let data = writer.into_inner().map_err(|e| e.to_string())?;
            String::from_utf8(data).map_err(|e| e.to_string())
        }
        _ => {
            // application/json and anything else.
            let objects: Vec<BTreeMap<&str, &str>> = records
                .iter()
                .map(|record| {
                    columns
                        .iter()
                        .map(|c| c.as_str())
                        .zip(record.iter().map(|v| v.as_str()))
                        .collect()
                })
                .collect();
            serde_json::to_string_pretty(&objects).map_err(|e| e.to_string())
        }
    }
}

fn sql_value_to_string(value: rusqlite::types::Value) -> String {
    use rusqlite::types::Value;
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
    }
}

// "text/csv; header=present" → ("text/csv", {header: present})
fn parse_accept(accept: &str) -> (String, BTreeMap<String, String>) {
    let mut parts = accept.split(';');
    let mediatype = parts.next().unwrap_or("").trim().to_string();
    let mut params = BTreeMap::new();
    for part in parts {
        if let Some((k, v)) = part.split_once('=') {
            params.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    (mediatype, params)
}

fn synthesize_response(
    request: &Request,
    status_code: u16,
    header: ValueMap,
    body: Vec<u8>,
    duration: Duration,
) -> Response {
    Response {
        status_code,
        status: format!("{}", status_code),
        proto: "HTTP/1.1".to_string(),
        header,
        body,
        body_err: None,
        duration: Some(duration),
        redirections: Vec::new(),
        request: request.clone(),
    }
}
