//! Loader registry over real files of every binary format we build by hand:
//! PDF, docx, pptx, odt, epub. Text formats are covered by unit tests.

use std::fs;
use std::io::Write;
use std::path::Path;

use libre_chat::loaders::{default_loaders, LoaderKind, LoaderRegistry, LoaderSpec};
use libre_chat_core::models::{META_PAGE, META_SOURCE};
use tempfile::TempDir;

/// Minimal valid PDF containing `phrase` on its single page.
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, content) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn docx(text: &str) -> Vec<u8> {
    let xml = format!(
        "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>",
        text
    );
    zip_of(&[("word/document.xml", &xml)])
}

fn pptx(slides: &[&str]) -> Vec<u8> {
    let xmls: Vec<(String, String)> = slides
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                format!("ppt/slides/slide{}.xml", i + 1),
                format!(
                    "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
                    text
                ),
            )
        })
        .collect();
    let entries: Vec<(&str, &str)> = xmls.iter().map(|(n, x)| (n.as_str(), x.as_str())).collect();
    zip_of(&entries)
}

fn odt(text: &str) -> Vec<u8> {
    let xml = format!(
        "<office:document-content xmlns:office=\"o\" xmlns:text=\"t\"><office:body><office:text><text:p>{}</text:p></office:text></office:body></office:document-content>",
        text
    );
    zip_of(&[("mimetype", "application/vnd.oasis.opendocument.text"), ("content.xml", &xml)])
}

fn epub(chapters: &[&str]) -> Vec<u8> {
    let container = r#"<?xml version="1.0"?><container xmlns="urn:oasis:names:tc:opendocument:xmlns:container"><rootfiles><rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#;
    let mut manifest = String::new();
    let mut spine = String::new();
    let mut files = Vec::new();
    for (i, text) in chapters.iter().enumerate() {
        manifest.push_str(&format!(
            r#"<item id="c{i}" href="ch{i}.xhtml" media-type="application/xhtml+xml"/>"#
        ));
        spine.push_str(&format!(r#"<itemref idref="c{i}"/>"#));
        files.push((
            format!("OEBPS/ch{i}.xhtml"),
            format!("<html><body><p>{}</p></body></html>", text),
        ));
    }
    let opf = format!(
        r#"<?xml version="1.0"?><package xmlns="http://www.idpf.org/2007/opf"><manifest>{}</manifest><spine>{}</spine></package>"#,
        manifest, spine
    );
    let mut entries: Vec<(&str, &str)> = vec![
        ("mimetype", "application/epub+zip"),
        ("META-INF/container.xml", container),
        ("OEBPS/content.opf", &opf),
    ];
    entries.extend(files.iter().map(|(n, x)| (n.as_str(), x.as_str())));
    zip_of(&entries)
}

fn registry() -> LoaderRegistry {
    LoaderRegistry::new(&default_loaders()).unwrap()
}

fn load_one(dir: &Path, name: &str, bytes: &[u8]) -> String {
    let path = dir.join(name);
    fs::write(&path, bytes).unwrap();
    registry()
        .load_file(&path)
        .unwrap()
        .into_iter()
        .map(|r| r.raw_text)
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn pdf_pages_become_records() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("capital.pdf");
    fs::write(&path, minimal_pdf("Amsterdam is the capital")).unwrap();

    let records = registry().load_file(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].raw_text.contains("Amsterdam"));
    let meta = records[0].metadata();
    assert_eq!(meta[META_SOURCE], path.display().to_string());
    assert!(meta.contains_key(META_PAGE));
}

#[test]
fn office_and_ebook_formats_extract_text() {
    let tmp = TempDir::new().unwrap();
    assert!(load_one(tmp.path(), "a.docx", &docx("word phrase")).contains("word phrase"));
    assert!(load_one(tmp.path(), "b.odt", &odt("odt phrase")).contains("odt phrase"));

    let slides = load_one(tmp.path(), "c.pptx", &pptx(&["first slide", "second slide"]));
    let first = slides.find("first slide").unwrap();
    let second = slides.find("second slide").unwrap();
    assert!(first < second);

    let book = load_one(tmp.path(), "d.epub", &epub(&["chapter one", "chapter two"]));
    assert!(book.find("chapter one").unwrap() < book.find("chapter two").unwrap());
}

#[test]
fn uppercase_extensions_match() {
    let tmp = TempDir::new().unwrap();
    assert!(load_one(tmp.path(), "REPORT.DOCX", &docx("loud")).contains("loud"));
}

#[test]
fn mixed_directory_loads_good_files_and_counts_bad_ones() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path();
    fs::write(dir.join("notes.txt"), "Plain notes about Rotterdam.").unwrap();
    fs::write(dir.join("report.docx"), docx("Utrecht report")).unwrap();
    fs::write(dir.join("broken.docx"), b"not a zip archive").unwrap();
    fs::write(dir.join("image.png"), [0x89, b'P', b'N', b'G']).unwrap();

    let report = registry().load_directory(dir).unwrap();
    assert_eq!(report.loaded_files.len(), 2);
    assert_eq!(report.skipped_count(), 1);
    assert!(report.skipped[0].path.ends_with("broken.docx"));
    let all: String = report.records.iter().map(|r| r.raw_text.as_str()).collect();
    assert!(all.contains("Rotterdam"));
    assert!(all.contains("Utrecht"));
}

#[test]
fn custom_table_restricts_formats() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("keep.txt"), "kept").unwrap();
    fs::write(tmp.path().join("drop.md"), "# dropped").unwrap();

    let registry = LoaderRegistry::new(&[LoaderSpec::new("*.txt", LoaderKind::Text)]).unwrap();
    let report = registry.load_directory(tmp.path()).unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].raw_text, "kept");
}
