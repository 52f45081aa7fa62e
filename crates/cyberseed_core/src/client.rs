use std::collections::BTreeMap;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::SeedConfig;

/// Page ids per `pageids=` request; keeps query strings well under URL limits.
pub const PAGE_BATCH_SIZE: usize = 40;
const CATEGORY_MEMBER_LIMIT: &str = "200";
const PAGE_CATEGORY_LIMIT: &str = "500";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryMember {
    pub title: String,
    pub page_id: i64,
}

/// Content and metadata of one remote page, as returned by a details query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageDetail {
    pub page_id: i64,
    pub title: String,
    pub revision_id: Option<i64>,
    pub wikitext: Option<String>,
    pub categories: Vec<String>,
    pub full_url: String,
}

pub trait WikiContentApi {
    fn list_category_members(&mut self, category: &str) -> Result<Vec<CategoryMember>>;
    fn get_pages_by_ids(&mut self, page_ids: &[i64]) -> Result<BTreeMap<i64, PageDetail>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &SeedConfig) -> Self {
        Self {
            api_url: config.api_url(),
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
            rate_delay_ms: config.rate_delay_ms(),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    fn request_json_get(&mut self, params: &[(String, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid wiki API url: {}", self.config.api_url))?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        pairs.extend(params.iter().cloned());

        self.apply_rate_limit();
        debug!(request = self.request_count, ?params, "GET {}", self.config.api_url);
        let response = self
            .client
            .get(base_url)
            .header("User-Agent", self.config.user_agent.clone())
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?
            .error_for_status()
            .context("MediaWiki API request failed")?;

        let body = response
            .text()
            .context("failed to read MediaWiki API response body")?;
        let payload: Value = serde_json::from_str(&body)
            .context("failed to decode MediaWiki API JSON response")?;
        if let Some(error) = payload.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            let info = error
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("unknown info");
            bail!("MediaWiki API error [{code}]: {info}");
        }
        Ok(payload)
    }

    /// Waits the full courtesy delay before every call, regardless of elapsed time.
    fn apply_rate_limit(&mut self) {
        sleep(Duration::from_millis(self.config.rate_delay_ms));
        self.request_count += 1;
    }
}

impl WikiContentApi for MediaWikiClient {
    fn list_category_members(&mut self, category: &str) -> Result<Vec<CategoryMember>> {
        let mut members = Vec::new();
        let mut continuation = Vec::new();

        loop {
            let mut params = query_params(&[
                ("action", "query"),
                ("list", "categorymembers"),
                ("cmtitle", category),
                ("cmlimit", CATEGORY_MEMBER_LIMIT),
            ]);
            params.extend(continuation);

            let response = self.request_json_get(&params)?;
            members.extend(
                parse_category_members(&response)
                    .with_context(|| format!("failed to decode members of {category}"))?,
            );

            match continuation_params(&response) {
                Some(next) => continuation = next,
                None => break,
            }
        }

        debug!(category, count = members.len(), "resolved category members");
        Ok(members)
    }

    fn get_pages_by_ids(&mut self, page_ids: &[i64]) -> Result<BTreeMap<i64, PageDetail>> {
        let mut pages = BTreeMap::new();
        for batch in page_id_batches(page_ids) {
            let mut continuation = Vec::new();
            loop {
                let mut params = query_params(&[
                    ("action", "query"),
                    ("prop", "revisions|categories|info"),
                    ("rvprop", "ids|timestamp|content"),
                    ("rvslots", "main"),
                    ("cllimit", PAGE_CATEGORY_LIMIT),
                    ("inprop", "url"),
                    ("pageids", batch.as_str()),
                ]);
                params.extend(continuation);

                let response = self.request_json_get(&params)?;
                merge_page_batch(&mut pages, &response)
                    .context("failed to decode page details response")?;

                match continuation_params(&response) {
                    Some(next) => continuation = next,
                    None => break,
                }
            }
        }
        Ok(pages)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Splits ids into `|`-joined groups of at most [`PAGE_BATCH_SIZE`].
pub fn page_id_batches(page_ids: &[i64]) -> Vec<String> {
    page_ids
        .chunks(PAGE_BATCH_SIZE)
        .map(|chunk| {
            chunk
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect()
}

fn query_params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

/// Every field of the `continue` object, to be sent back verbatim.
fn continuation_params(payload: &Value) -> Option<Vec<(String, String)>> {
    let object = payload.get("continue")?.as_object()?;
    let params = object
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect::<Vec<_>>();
    if params.is_empty() { None } else { Some(params) }
}

fn parse_category_members(payload: &Value) -> Result<Vec<CategoryMember>> {
    let parsed: QueryResponse = serde_json::from_value(payload.clone())?;
    Ok(parsed
        .query
        .categorymembers
        .into_iter()
        .map(|item| CategoryMember {
            title: item.title,
            page_id: item.pageid,
        })
        .collect())
}

/// Folds one details response into `pages`. A continued response repeats pages
/// already seen; their category lists are extended in place.
fn merge_page_batch(pages: &mut BTreeMap<i64, PageDetail>, payload: &Value) -> Result<()> {
    let parsed: QueryResponse = serde_json::from_value(payload.clone())?;
    for item in parsed.query.pages {
        if item.missing.unwrap_or(false) {
            continue;
        }
        let Some(page_id) = item.pageid else {
            continue;
        };

        let entry = pages.entry(page_id).or_insert_with(|| PageDetail {
            page_id,
            title: item.title.clone(),
            ..PageDetail::default()
        });
        if let Some(revision) = item.revisions.into_iter().next() {
            entry.revision_id = Some(revision.revid);
            entry.wikitext = revision
                .slots
                .and_then(|slots| slots.main)
                .map(|slot| slot.content);
        }
        if let Some(url) = item.fullurl {
            entry.full_url = url;
        }
        for category in item.categories {
            if !entry.categories.contains(&category.title) {
                entry.categories.push(category.title);
            }
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    categorymembers: Vec<CategoryMemberItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct CategoryMemberItem {
    pageid: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    pageid: Option<i64>,
    title: String,
    missing: Option<bool>,
    fullurl: Option<String>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    categories: Vec<CategoryQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct CategoryQueryItem {
    title: String,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::{Duration, Instant};

    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::{
        MediaWikiClient, MediaWikiClientConfig, PAGE_BATCH_SIZE, WikiContentApi,
        continuation_params, merge_page_batch, page_id_batches, parse_category_members,
    };
    use crate::failure::{FailureKind, classify};

    const TEST_USER_AGENT: &str = "cyberseed-test/1.0";

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("tokio runtime")
    }

    fn client_for(server: &MockServer, rate_delay_ms: u64) -> MediaWikiClient {
        MediaWikiClient::new(MediaWikiClientConfig {
            api_url: format!("{}/api.php", server.uri()),
            user_agent: TEST_USER_AGENT.to_string(),
            timeout_ms: 5_000,
            rate_delay_ms,
        })
        .expect("client")
    }

    fn query_value(request: &Request, key: &str) -> Option<String> {
        request
            .url
            .query_pairs()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.into_owned())
    }

    #[test]
    fn page_ids_are_split_into_batches_of_forty() {
        let ids = (1..=85).collect::<Vec<i64>>();
        let batches = page_id_batches(&ids);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].split('|').count(), PAGE_BATCH_SIZE);
        assert_eq!(batches[1].split('|').count(), PAGE_BATCH_SIZE);
        assert_eq!(batches[2], "81|82|83|84|85");
        assert!(page_id_batches(&[]).is_empty());
    }

    #[test]
    fn category_members_and_continuation_are_decoded() {
        let payload = json!({
            "batchcomplete": true,
            "continue": {"cmcontinue": "page|4b4142554b49|1042", "continue": "-||"},
            "query": {"categorymembers": [
                {"pageid": 1042, "ns": 0, "title": "Kabuki (2077)"},
                {"pageid": 1043, "ns": 0, "title": "Little China"}
            ]}
        });

        let members = parse_category_members(&payload).expect("members");
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].title, "Kabuki (2077)");
        assert_eq!(members[1].page_id, 1043);

        let continuation = continuation_params(&payload).expect("continuation");
        assert!(continuation.contains(&(
            "cmcontinue".to_string(),
            "page|4b4142554b49|1042".to_string()
        )));
        assert!(continuation.contains(&("continue".to_string(), "-||".to_string())));
    }

    #[test]
    fn final_page_has_no_continuation() {
        let payload = json!({"batchcomplete": true, "query": {"categorymembers": []}});
        assert!(continuation_params(&payload).is_none());
        assert!(parse_category_members(&payload).expect("members").is_empty());
    }

    #[test]
    fn page_details_are_keyed_by_page_id_and_skip_missing() {
        let payload = json!({
            "query": {"pages": [
                {
                    "pageid": 7,
                    "ns": 0,
                    "title": "Kabuki (2077)",
                    "fullurl": "https://cyberpunk.fandom.com/wiki/Kabuki_(2077)",
                    "revisions": [{
                        "revid": 900,
                        "timestamp": "2024-01-01T00:00:00Z",
                        "slots": {"main": {"contentmodel": "wikitext", "content": "'''Kabuki''' text"}}
                    }],
                    "categories": [{"ns": 14, "title": "Category:Watson"}]
                },
                {"ns": 0, "title": "Ghost page", "missing": true}
            ]}
        });

        let mut pages = BTreeMap::new();
        merge_page_batch(&mut pages, &payload).expect("merge");
        assert_eq!(pages.len(), 1);
        let page = &pages[&7];
        assert_eq!(page.title, "Kabuki (2077)");
        assert_eq!(page.revision_id, Some(900));
        assert_eq!(page.wikitext.as_deref(), Some("'''Kabuki''' text"));
        assert_eq!(page.categories, vec!["Category:Watson".to_string()]);
        assert_eq!(
            page.full_url,
            "https://cyberpunk.fandom.com/wiki/Kabuki_(2077)"
        );
    }

    #[test]
    fn continued_details_extend_categories_without_losing_revision() {
        let first = json!({
            "continue": {"clcontinue": "7|Watson", "continue": "||revisions|info"},
            "query": {"pages": [{
                "pageid": 7,
                "title": "Kabuki (2077)",
                "fullurl": "https://cyberpunk.fandom.com/wiki/Kabuki_(2077)",
                "revisions": [{"revid": 900, "slots": {"main": {"content": "body"}}}],
                "categories": [{"title": "Category:Cyberpunk 2077 Sub-districts"}]
            }]}
        });
        let second = json!({
            "query": {"pages": [{
                "pageid": 7,
                "title": "Kabuki (2077)",
                "categories": [{"title": "Category:Watson"}]
            }]}
        });

        let mut pages = BTreeMap::new();
        merge_page_batch(&mut pages, &first).expect("first");
        merge_page_batch(&mut pages, &second).expect("second");
        let page = &pages[&7];
        assert_eq!(page.revision_id, Some(900));
        assert_eq!(page.wikitext.as_deref(), Some("body"));
        assert_eq!(page.categories.len(), 2);
        assert!(page.full_url.ends_with("Kabuki_(2077)"));
    }

    #[test]
    fn category_listing_follows_continuation_until_exhausted() {
        let rt = runtime();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/api.php"))
                .and(query_param("cmcontinue", "page|4c49|1043"))
                .and(query_param("continue", "-||"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "batchcomplete": true,
                    "query": {"categorymembers": [
                        {"pageid": 1043, "ns": 0, "title": "Little China"}
                    ]}
                })))
                .with_priority(1)
                .mount(&server),
        );
        rt.block_on(
            Mock::given(method("GET"))
                .and(path("/api.php"))
                .and(header("User-Agent", TEST_USER_AGENT))
                .and(query_param("list", "categorymembers"))
                .and(query_param("cmtitle", "Category:Cyberpunk_2077_Sub-districts"))
                .and(query_param("formatversion", "2"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "continue": {"cmcontinue": "page|4c49|1043", "continue": "-||"},
                    "query": {"categorymembers": [
                        {"pageid": 1042, "ns": 0, "title": "Kabuki (2077)"}
                    ]}
                })))
                .mount(&server),
        );

        let mut client = client_for(&server, 20);
        let started = Instant::now();
        let members = client
            .list_category_members("Category:Cyberpunk_2077_Sub-districts")
            .expect("members");

        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(
            members.iter().map(|member| member.page_id).collect::<Vec<_>>(),
            vec![1042, 1043]
        );
        assert_eq!(client.request_count(), 2);

        let requests = rt
            .block_on(server.received_requests())
            .expect("request recording");
        assert_eq!(requests.len(), 2);
        assert_eq!(query_value(&requests[0], "cmcontinue"), None);
        assert_eq!(
            query_value(&requests[1], "cmcontinue").as_deref(),
            Some("page|4c49|1043")
        );
    }

    #[test]
    fn page_details_are_requested_in_batches_of_forty() {
        let rt = runtime();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("GET"))
                .and(query_param("prop", "revisions|categories|info"))
                .and(query_param("rvslots", "main"))
                .respond_with(|request: &Request| {
                    let pages = query_value(request, "pageids")
                        .unwrap_or_default()
                        .split('|')
                        .map(|id| {
                            let page_id: i64 = id.parse().expect("numeric page id");
                            json!({
                                "pageid": page_id,
                                "title": format!("Page {page_id}"),
                                "fullurl": format!("https://cyberpunk.fandom.com/wiki/Page_{page_id}"),
                                "revisions": [{"revid": page_id * 10, "slots": {"main": {"content": "text"}}}]
                            })
                        })
                        .collect::<Vec<_>>();
                    ResponseTemplate::new(200).set_body_json(json!({"query": {"pages": pages}}))
                })
                .mount(&server),
        );

        let mut client = client_for(&server, 0);
        let ids = (1..=85).collect::<Vec<i64>>();
        let pages = client.get_pages_by_ids(&ids).expect("pages");

        assert_eq!(pages.len(), 85);
        assert_eq!(pages[&85].revision_id, Some(850));
        assert_eq!(client.request_count(), 3);

        let requests = rt
            .block_on(server.received_requests())
            .expect("request recording");
        let batch_sizes = requests
            .iter()
            .map(|request| {
                query_value(request, "pageids")
                    .unwrap_or_default()
                    .split('|')
                    .count()
            })
            .collect::<Vec<_>>();
        assert_eq!(batch_sizes, vec![PAGE_BATCH_SIZE, PAGE_BATCH_SIZE, 5]);
    }

    #[test]
    fn error_status_aborts_as_http_failure_without_retry() {
        let rt = runtime();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(503))
                .mount(&server),
        );

        let mut client = client_for(&server, 0);
        let error = client
            .list_category_members("Category:Cyberpunk_2077_Consumables")
            .expect_err("503 must fail");

        assert_eq!(classify(&error), FailureKind::Http);
        assert!(format!("{error:#}").contains("503"));
        let requests = rt
            .block_on(server.received_requests())
            .expect("request recording");
        assert_eq!(requests.len(), 1);
    }

    #[test]
    fn malformed_json_body_is_not_an_http_failure() {
        let rt = runtime();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
                .mount(&server),
        );

        let mut client = client_for(&server, 0);
        let error = client
            .get_pages_by_ids(&[7])
            .expect_err("html body must fail");

        assert_eq!(classify(&error), FailureKind::Other);
        assert!(error.to_string().contains("failed to decode MediaWiki API JSON response"));
    }

    #[test]
    fn api_error_object_is_reported() {
        let rt = runtime();
        let server = rt.block_on(MockServer::start());
        rt.block_on(
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "error": {"code": "badvalue", "info": "Unrecognized value for parameter"}
                })))
                .mount(&server),
        );

        let mut client = client_for(&server, 0);
        let error = client
            .list_category_members("Category:Nope")
            .expect_err("api error must fail");

        assert_eq!(classify(&error), FailureKind::Other);
        assert!(error.to_string().contains("[badvalue]"));
    }
}
