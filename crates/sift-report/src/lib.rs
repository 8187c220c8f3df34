//! Report generation for curated search results and reconciliation output.

use std::cmp::Ordering;

use anyhow::{anyhow, Context};
use askama::Template;
use chrono::NaiveDateTime;
use percent_encoding::percent_decode_str;
use sift_core::{Candidate, CuratedList, MissingRecord, RawRecord, RecencyWindow};
use sift_storage::{ReportStore, StoredReport};
use tracing::info;
use url::Url;

mod server;

pub use server::{app, port_from_env, serve, AppState};

pub const CRATE_NAME: &str = "sift-report";

pub const REPORT_PREFIX: &str = "result_";
pub const REPORT_NAME_FORMAT: &str = "result_%d_%m_%Y_%H_%M.html";
pub const INDEX_FILE: &str = "index.html";
pub const MISSING_CSV_FILE: &str = "missing_items_final.csv";

const DISPLAY_URL_MAX_CHARS: usize = 65;
const DISPLAY_URL_HEAD: usize = 45;
const DISPLAY_URL_TAIL: usize = 15;
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A run of text, marked when it is one of the highlight keywords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub highlighted: bool,
}

impl Segment {
    fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            highlighted: false,
        }
    }

    fn marked(text: &str) -> Self {
        Self {
            text: text.to_string(),
            highlighted: true,
        }
    }
}

/// Splits `text` around keyword occurrences (longest match, ASCII case ignored).
pub fn highlight_segments(text: &str, words: &[String]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut plain_start = 0;
    let mut i = 0;
    while i < text.len() {
        let rest = &text[i..];
        let matched = words
            .iter()
            .filter(|w| !w.is_empty())
            .filter(|w| rest.get(..w.len()).is_some_and(|head| head.eq_ignore_ascii_case(w)))
            .map(|w| w.len())
            .max();
        match matched {
            Some(len) => {
                if plain_start < i {
                    segments.push(Segment::plain(&text[plain_start..i]));
                }
                segments.push(Segment::marked(&text[i..i + len]));
                i += len;
                plain_start = i;
            }
            None => i += rest.chars().next().map_or(1, char::len_utf8),
        }
    }
    if plain_start < text.len() {
        segments.push(Segment::plain(&text[plain_start..]));
    }
    segments
}

/// Percent-decoded url, shortened in the middle when long.
pub fn display_url(url: &str) -> String {
    let decoded = percent_decode_str(url).decode_utf8_lossy().into_owned();
    let count = decoded.chars().count();
    if count <= DISPLAY_URL_MAX_CHARS {
        return decoded;
    }
    let head: String = decoded.chars().take(DISPLAY_URL_HEAD).collect();
    let tail: String = decoded.chars().skip(count - DISPLAY_URL_TAIL).collect();
    format!("{head}...{tail}")
}

pub fn site_domain(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    }
}

pub fn favicon_url(domain: &str) -> String {
    format!("https://s2.googleusercontent.com/s2/favicons?domain={domain}&sz=32")
}

pub fn recency_badge(window: RecencyWindow) -> &'static str {
    match window {
        RecencyWindow::LastDay => "ภายใน 24 ชั่วโมงที่ผ่านมา — ",
        RecencyWindow::LastWeek => "ภายใน 7 วันที่ผ่านมา — ",
        RecencyWindow::LastMonth => "ภายใน 1 เดือนที่ผ่านมา — ",
    }
}

#[derive(Debug, Clone)]
struct ReportEntry {
    position: usize,
    url: String,
    domain: String,
    favicon_url: String,
    display_url: String,
    badge: &'static str,
    title: Vec<Segment>,
    snippet: Vec<Segment>,
}

impl ReportEntry {
    fn from_candidate(position: usize, candidate: &Candidate, highlight: &[String]) -> Self {
        let domain = site_domain(&candidate.url);
        Self {
            position,
            url: candidate.url.clone(),
            favicon_url: favicon_url(&domain),
            domain,
            display_url: display_url(&candidate.url),
            badge: recency_badge(candidate.recency_tag),
            title: highlight_segments(&candidate.title, highlight),
            snippet: highlight_segments(&candidate.snippet, highlight),
        }
    }
}

#[derive(Template)]
#[template(path = "report.html")]
struct SearchReportTemplate {
    generated_label: String,
    entries: Vec<ReportEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub file_name: String,
    pub label: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    reports: Vec<IndexEntry>,
    link_prefix: String,
    updated_label: String,
}

pub fn report_file_name(generated_at: NaiveDateTime) -> String {
    generated_at.format(REPORT_NAME_FORMAT).to_string()
}

pub fn parse_report_time(file_name: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(file_name, REPORT_NAME_FORMAT).ok()
}

fn display_time(at: NaiveDateTime) -> String {
    at.format("%d/%m/%Y %H:%M").to_string()
}

pub fn render_search_report(
    list: &CuratedList,
    highlight: &[String],
    generated_at: NaiveDateTime,
) -> anyhow::Result<String> {
    let entries = list
        .iter()
        .enumerate()
        .map(|(idx, candidate)| ReportEntry::from_candidate(idx + 1, candidate, highlight))
        .collect();
    SearchReportTemplate {
        generated_label: display_time(generated_at),
        entries,
    }
    .render()
    .map_err(|err| anyhow!("rendering search report: {err}"))
}

/// Newest first by the time encoded in the name; unrecognized names go last.
pub fn index_entries(mut file_names: Vec<String>) -> Vec<IndexEntry> {
    file_names.sort_by(|a, b| match (parse_report_time(a), parse_report_time(b)) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.cmp(a)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => b.cmp(a),
    });
    file_names
        .into_iter()
        .map(|file_name| {
            let label = match parse_report_time(&file_name) {
                Some(at) => format!(
                    "รายงานวันที่ {} เวลา {}",
                    at.format("%d/%m/%Y"),
                    at.format("%H:%M")
                ),
                None => file_name.clone(),
            };
            IndexEntry { file_name, label }
        })
        .collect()
}

pub fn render_index(
    entries: &[IndexEntry],
    link_prefix: &str,
    updated_at: NaiveDateTime,
) -> anyhow::Result<String> {
    IndexTemplate {
        reports: entries.to_vec(),
        link_prefix: link_prefix.to_string(),
        updated_label: display_time(updated_at),
    }
    .render()
    .map_err(|err| anyhow!("rendering report index: {err}"))
}

/// Missing rows under the competitor's column order, UTF-8 with BOM.
pub fn missing_items_csv(columns: &[String], missing: &[MissingRecord]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(UTF8_BOM.to_vec());
    writer
        .write_record(columns)
        .context("writing missing-items header")?;
    for item in missing {
        writer
            .write_record(
                columns
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| export_cell(&item.record, idx, column)),
            )
            .with_context(|| format!("writing missing item `{}`", item.key))?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow!("flushing missing-items csv: {}", err.error()))
}

/// Rows parsed from the competitor sheet line up with its header by position,
/// so repeated header names keep their own cells.
fn export_cell(record: &RawRecord, idx: usize, column: &str) -> String {
    let cell = match record.fields().get(idx) {
        Some(field) if field.column == column => Some(&field.value),
        _ => record.get(column),
    };
    cell.map(ToString::to_string).unwrap_or_default()
}

pub async fn write_search_report(
    store: &ReportStore,
    list: &CuratedList,
    highlight: &[String],
    generated_at: NaiveDateTime,
) -> anyhow::Result<StoredReport> {
    let html = render_search_report(list, highlight, generated_at)?;
    let name = report_file_name(generated_at);
    let stored = store
        .write_atomic(&name, html.as_bytes())
        .await
        .with_context(|| format!("writing search report {name}"))?;
    info!(
        path = %stored.absolute_path.display(),
        entries = list.len(),
        unchanged = stored.unchanged,
        "search report written"
    );
    Ok(stored)
}

pub async fn write_index(store: &ReportStore, updated_at: NaiveDateTime) -> anyhow::Result<StoredReport> {
    let names = store.list_files(REPORT_PREFIX, "html").await?;
    let html = render_index(&index_entries(names), "", updated_at)?;
    let stored = store
        .write_atomic(INDEX_FILE, html.as_bytes())
        .await
        .context("writing report index")?;
    info!(path = %stored.absolute_path.display(), "report index written");
    Ok(stored)
}

pub async fn write_missing_csv(
    store: &ReportStore,
    columns: &[String],
    missing: &[MissingRecord],
) -> anyhow::Result<StoredReport> {
    let bytes = missing_items_csv(columns, missing)?;
    let stored = store
        .write_atomic(MISSING_CSV_FILE, &bytes)
        .await
        .context("writing missing-items csv")?;
    info!(
        path = %stored.absolute_path.display(),
        rows = missing.len(),
        "missing-items csv written"
    );
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use sift_core::{CanonicalKey, CellValue};
    use tempfile::tempdir;

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn candidate(url: &str, title: &str, window: RecencyWindow) -> Candidate {
        Candidate {
            url: url.to_string(),
            title: title.to_string(),
            snippet: "ประกาศขายครุภัณฑ์ <ชำรุด>".to_string(),
            recency_tag: window,
            query: "ขายทอดตลาด".to_string(),
        }
    }

    #[test]
    fn segments_mark_keywords_with_longest_match() {
        let segments = highlight_segments(
            "ประกาศขายทอดตลาดพัสดุ",
            &words(&["ขาย", "ขายทอดตลาด", "พัสดุ"]),
        );
        assert_eq!(
            segments,
            vec![
                Segment::plain("ประกาศ"),
                Segment::marked("ขายทอดตลาด"),
                Segment::marked("พัสดุ"),
            ]
        );
        assert_eq!(
            highlight_segments("Car AUCTION today", &words(&["auction"])),
            vec![
                Segment::plain("Car "),
                Segment::marked("AUCTION"),
                Segment::plain(" today"),
            ]
        );
        assert!(highlight_segments("", &words(&["x"])).is_empty());
    }

    #[test]
    fn long_urls_are_decoded_then_shortened() {
        assert_eq!(display_url("https://a.test/%E0%B8%82"), "https://a.test/ข");
        let long = format!("https://example.test/{}", "a".repeat(80));
        let shown = display_url(&long);
        assert_eq!(shown.chars().count(), 45 + 3 + 15);
        assert!(shown.starts_with("https://example.test/aaaa"));
        assert!(shown.contains("..."));
        let exact = format!("https://x.test/{}", "b".repeat(65 - 15));
        assert_eq!(display_url(&exact), exact);
    }

    #[test]
    fn domain_and_badges() {
        assert_eq!(site_domain("https://www.Agency.go.th/a?b=1"), "www.agency.go.th");
        assert_eq!(site_domain("http://a.test:8080/x"), "a.test:8080");
        assert_eq!(site_domain("not a url"), "");
        assert!(favicon_url("a.test").ends_with("domain=a.test&sz=32"));
        assert!(recency_badge(RecencyWindow::LastDay).contains("24"));
        assert!(recency_badge(RecencyWindow::LastMonth).contains("เดือน"));
    }

    #[test]
    fn search_report_escapes_text_and_highlights_keywords() {
        let list = CuratedList::from_ranked(vec![
            candidate("https://a.test/1", "ขายทอดตลาด <script>", RecencyWindow::LastDay),
            candidate("https://b.test/2", "รถยนต์", RecencyWindow::LastWeek),
        ]);
        let html = render_search_report(&list, &words(&["ขายทอดตลาด", "ครุภัณฑ์"]), at(19, 7, 5)).unwrap();
        assert!(html.contains("พบข้อมูลทั้งหมด 2 รายการ"));
        assert!(html.contains("<span class=\"highlight\">ขายทอดตลาด</span>"));
        assert!(html.contains("<span class=\"highlight\">ครุภัณฑ์</span>"));
        assert!(html.contains("</span> &lt;script&gt;"));
        assert!(!html.contains("</span> <script>"));
        assert!(html.contains("ภายใน 24 ชั่วโมงที่ผ่านมา"));
        assert!(html.contains("ภายใน 7 วันที่ผ่านมา"));
        assert!(html.contains("viewedLinks"));
        assert!(html.contains(">a.test<"));
    }

    #[test]
    fn report_names_round_trip_through_the_index_label() {
        let name = report_file_name(at(9, 7, 0));
        assert_eq!(name, "result_09_10_2026_07_00.html");
        assert_eq!(parse_report_time(&name), Some(at(9, 7, 0)));
        assert_eq!(parse_report_time("result_notes.html"), None);
    }

    #[test]
    fn index_lists_newest_first_by_encoded_time() {
        let entries = index_entries(words(&[
            "result_09_10_2026_07_00.html",
            "result_custom.html",
            "result_19_09_2026_23_59.html",
            "result_10_10_2026_06_30.html",
        ]));
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "result_10_10_2026_06_30.html",
                "result_09_10_2026_07_00.html",
                "result_19_09_2026_23_59.html",
                "result_custom.html",
            ]
        );
        assert_eq!(entries[0].label, "รายงานวันที่ 10/10/2026 เวลา 06:30");
        assert_eq!(entries[3].label, "result_custom.html");

        let html = render_index(&entries, "reports/", at(19, 8, 0)).unwrap();
        assert!(html.contains("result_10_10_2026_06_30.html"));
        assert!(html.contains("เวลา 06:30"));
        let empty = render_index(&[], "", at(19, 8, 0)).unwrap();
        assert!(empty.contains("ยังไม่มีรายงาน"));
    }

    #[test]
    fn missing_csv_keeps_competitor_columns_and_bom() {
        let columns = words(&["ลำดับ", "รายการ", "ราคา"]);
        let missing = vec![MissingRecord {
            key: CanonicalKey::new("รถยนต์ชำรุด"),
            record: RawRecord::from_pairs([
                ("ลำดับ", CellValue::Number(2.0)),
                ("รายการ", CellValue::from("รถยนต์ชำรุด, 1 คัน")),
                ("ราคา", CellValue::Empty),
            ]),
        }];
        let bytes = missing_items_csv(&columns, &missing).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        assert_eq!(text, "ลำดับ,รายการ,ราคา\n2,\"รถยนต์ชำรุด, 1 คัน\",\n");
    }

    #[test]
    fn sheet_text_survives_parse_and_export() {
        let sheet = "ลำดับ,รหัส,ราคา\n1,0012,1.50\n2,12345678901234567,007\n";
        let table = sift_adapters::parse_csv_table("competitor", sheet.as_bytes()).unwrap();
        let missing: Vec<MissingRecord> = table
            .rows
            .iter()
            .map(|row| MissingRecord {
                key: CanonicalKey::new(row.get("รหัส").map(ToString::to_string).unwrap_or_default()),
                record: row.clone(),
            })
            .collect();

        let bytes = missing_items_csv(&table.columns, &missing).unwrap();
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        assert_eq!(text, sheet);
    }

    #[test]
    fn missing_csv_keeps_repeated_header_cells_apart() {
        let columns = words(&["รายการ", "รายการ", "ราคา"]);
        let missing = vec![MissingRecord {
            key: CanonicalKey::new("รถยนต์"),
            record: RawRecord::from_pairs([
                ("รายการ", CellValue::from("รถยนต์")),
                ("รายการ", CellValue::from("สีขาว")),
                ("ราคา", CellValue::from("500")),
            ]),
        }];
        let bytes = missing_items_csv(&columns, &missing).unwrap();
        let text = String::from_utf8(bytes[3..].to_vec()).unwrap();
        assert_eq!(text, "รายการ,รายการ,ราคา\nรถยนต์,สีขาว,500\n");
    }

    #[tokio::test]
    async fn written_reports_show_up_in_the_index() {
        let dir = tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        let list = CuratedList::from_ranked(vec![candidate(
            "https://a.test/1",
            "ขายทอดตลาด",
            RecencyWindow::LastDay,
        )]);

        let report = write_search_report(&store, &list, &words(&["ขายทอดตลาด"]), at(19, 7, 0))
            .await
            .unwrap();
        assert_eq!(
            report.relative_path.to_string_lossy(),
            "result_19_10_2026_07_00.html"
        );
        write_search_report(&store, &CuratedList::default(), &[], at(18, 7, 0))
            .await
            .unwrap();

        let index = write_index(&store, at(19, 7, 1)).await.unwrap();
        let html = std::fs::read_to_string(&index.absolute_path).unwrap();
        let newest = html.find("result_19_10_2026_07_00.html").unwrap();
        let older = html.find("result_18_10_2026_07_00.html").unwrap();
        assert!(newest < older);
        assert!(!html.contains("href=\"index.html\""));

        let csv = write_missing_csv(&store, &words(&["a"]), &[]).await.unwrap();
        assert_eq!(csv.relative_path.to_string_lossy(), MISSING_CSV_FILE);
    }
}
