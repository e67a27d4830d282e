//! Integration tests for the catalogue, material trees, and videostores.

mod support;

use std::path::PathBuf;

use chrono::NaiveDate;
use politodown::{FileKind, PortalError, VideostoreSource};
use support::{
    ASSIGNMENTS_PATH, CATALOG_PATH, LEGACY_PARAMS_PATH, LEGACY_VIDEOSTORE_PATH, NEXT_LEVEL_PATH,
    VIDEOSTORE_PATH, html, signed_in_portal,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MATERIALS_PAGE: &str = r#"<html><body>
    <table>
      <tr><td><a class="policorpolink" href="javascript:materiale('2023','M','01','555')">Fisica I </a></td></tr>
      <tr><td><a class="policorpolink" href="javascript:materiale('2023','E','02','777')">Analisi matematica I</a></td></tr>
      <tr><td><a class="policorpolink" href="javascript:apriHelp()">Guida</a></td></tr>
    </table></body></html>"#;

const VIDEOSTORES_PAGE: &str = r##"<html><body>
    <a href="#" onclick="showDivVideoteca('ing')"> Ingegneria </a>
    <div class="policorpo">
      <a class="policorpolink" href="sviluppo.videolezioni.vis?cor=100">Analisi I</a>
      <a class="policorpolink" href="javascript:void(null);" onclick="dokeosLez('456')">Fisica</a>
      <a class="policorpolink" href="https://video.example/other">Esterno</a>
    </div>
    <a href="#" onclick="showDivVideoteca('arc')">Architettura</a>
    <div class="policorpo">
      <a class="policorpolink" href="sviluppo.videolezioni.vis?cor=200">Disegno</a>
    </div></body></html>"##;

const ASSIGNMENTS_PAGE: &str = r#"<html><body>
    <a class="policorpo" href="javascript:inc('1','2','3')">Teoria</a>
    <a class="policorpo" href="javascript:inc('1','9','3')">Laboratorio</a>
    </body></html>"#;

const TEORIA_PAGE: &str = r#"<table>
    <tr><td><a href="javascript:apri('1','20','3')">Esercitazioni</a></td></tr>
    <tr><td><a href="sviluppo.materiale.download?nod=444">Lezione 1</a> pdf [1 MB]</td></tr>
    </table>"#;

const ESERCITAZIONI_PAGE: &str = r#"<table>
    <tr><td><a href="sviluppo.materiale.download?nod=555">Esercizi</a> zip [20 KB]</td></tr>
    </table>"#;

const CURRENT_INDEX: &str = r##"<ul>
    <li><a href="sviluppo.videolezioni.vis?cor=100&lez=1" style="color:#003576;">Introduzione</a>
        <span class="small">del 02/03/2023</span></li>
    <li class="argomentiEspansi"><a class="argoLink" href="#">Vettori</a></li>
    <li><a href="sviluppo.videolezioni.vis?cor=100&lez=2" style="color:#003576;">Matrici</a>
        <span class="small">del 09/03/2023</span></li>
    <li class="argomentiEspansi"></li>
    </ul>"##;

fn current_lesson(file: &str, id: u32) -> String {
    format!(
        r#"<html><body>
        <a href="/videolezioni/download.php?id={id}">Video</a>
        <script type="text/javascript">
        tmpTitle = '<table>' +
                   '<tr><td>File</td><td>{file}</td></tr>' +
                   '<tr><td>Durata</td><td>01:30:00</td></tr>' +
                   '</table>';
        </script></body></html>"#
    )
}

const LEGACY_INDEX: &str = r##"<html><body>
    <ul class="lezioni">
      <li><a href="template_video.php?lez=1">Onde</a> <span class="small">del 2019-10-01</span>
        <ul><li class="argEspansi1"><a class="argoLink" href="#">Interferenza</a></li></ul></li>
    </ul></body></html>"##;

const LEGACY_LESSON: &str = r#"<html><body>
    <a href="download.php?f=onde.mp4">Video</a>
    <div id="tooltip1"><table>
      <tr><td class="label">File</td><td class="value"> onde.mp4 </td></tr>
      <tr><td class="label">Durata</td><td class="value">00:45:00</td></tr>
    </table></div></body></html>"#;

async fn mount_catalog(server: &MockServer, kind: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .and(query_param("a", "2023"))
        .and(query_param("t", kind))
        .respond_with(html(body))
        .mount(server)
        .await;
}

async fn mount_material_tree(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(ASSIGNMENTS_PATH))
        .and(query_param("mat", "555"))
        .and(query_param("aa", "2023"))
        .and(query_param("typ", "M"))
        .respond_with(html(ASSIGNMENTS_PAGE))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(NEXT_LEVEL_PATH))
        .and(query_param("nod", "2"))
        .respond_with(html(TEORIA_PAGE))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(NEXT_LEVEL_PATH))
        .and(query_param("nod", "20"))
        .respond_with(html(ESERCITAZIONI_PAGE))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_materials_lists_course_links() {
    let server = MockServer::start().await;
    mount_catalog(&server, "M", MATERIALS_PAGE).await;
    let portal = signed_in_portal(&server).await;

    let materials = portal.materials(2023).await.expect("materials should list");
    let names: Vec<&str> = materials.iter().map(|m| m.name()).collect();
    assert_eq!(names, ["Fisica I", "Analisi matematica I"]);
    assert_eq!(materials[0].year(), 2023);
    assert_eq!(materials[0].location(), PathBuf::from("2023/Fisica I"));
}

#[tokio::test]
async fn test_materials_access_denied() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("Access denied!\n"))
        .mount(&server)
        .await;
    let portal = signed_in_portal(&server).await;

    let result = portal.materials(1999).await;
    assert!(matches!(result, Err(PortalError::AccessDenied { .. })), "{result:?}");
}

#[tokio::test]
async fn test_catalog_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let portal = signed_in_portal(&server).await;

    let result = portal.videostores(2023).await;
    assert!(
        matches!(result, Err(PortalError::HttpStatus { status: 500, .. })),
        "{result:?}"
    );
}

#[tokio::test]
async fn test_videostores_groups_current_and_legacy() {
    let server = MockServer::start().await;
    mount_catalog(&server, "E", VIDEOSTORES_PAGE).await;
    Mock::given(method("GET"))
        .and(path(LEGACY_PARAMS_PATH))
        .and(query_param("inc", "456"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "utente": "s123456",
            "data": "20231001",
            "token": "abcdef"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let portal = signed_in_portal(&server).await;

    let categories = portal.videostores(2023).await.expect("videostores should list");
    assert_eq!(categories.len(), 2);
    assert_eq!(categories[0].name, "Ingegneria");
    assert_eq!(categories[1].name, "Architettura");

    let ingegneria = &categories[0].videostores;
    assert_eq!(ingegneria.len(), 2);
    assert_eq!(ingegneria[0].name(), "Analisi I");
    assert_eq!(
        ingegneria[0].source(),
        &VideostoreSource::Current {
            cor: "100".to_string()
        }
    );
    assert_eq!(ingegneria[1].name(), "Fisica");
    let VideostoreSource::Legacy { inc, params } = ingegneria[1].source() else {
        panic!("expected a legacy videostore");
    };
    assert_eq!(inc, "456");
    assert_eq!(params.utente, "s123456");
    assert_eq!(params.token, "abcdef");
    assert_eq!(ingegneria[1].category(), "Ingegneria");
    assert_eq!(ingegneria[1].location(), PathBuf::from("2023/Fisica"));
}

#[tokio::test]
async fn test_material_tree_recursive_files_are_depth_first() {
    let server = MockServer::start().await;
    mount_material_tree(&server).await;
    let portal = signed_in_portal(&server).await;
    let material = politodown::Material::new(2023, "Fisica I", "M", "555");

    let assignments = material
        .assignments(&portal, false)
        .await
        .expect("assignments should list");
    let names: Vec<&str> = assignments.iter().map(|a| a.name()).collect();
    assert_eq!(names, ["Teoria", "Laboratorio"]);

    // Served from the cache: the assignments mock expects a single request.
    let again = material.assignments(&portal, false).await.expect("cached");
    assert_eq!(again.len(), 2);

    let teoria = &assignments[0];
    let flat = teoria.files(&portal, false, false).await.expect("files");
    assert_eq!(flat.len(), 1);
    assert_eq!(flat[0].name(), "Lezione 1");

    let files = teoria.files(&portal, true, false).await.expect("recursive files");
    let paths: Vec<PathBuf> = files.iter().map(|f| f.relative_path()).collect();
    assert_eq!(
        paths,
        [
            PathBuf::from("2023/Fisica I/Teoria/Lezione 1"),
            PathBuf::from("2023/Fisica I/Teoria/Esercitazioni/Esercizi"),
        ]
    );
    assert_eq!(
        files[1].kind(),
        &FileKind::Document {
            extension: Some("zip".to_string()),
            size: Some("20 KB".to_string()),
        }
    );
    assert_eq!(files[1].link().query(), Some("nod=555"));
}

#[tokio::test]
async fn test_folder_children_force_update_refetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(NEXT_LEVEL_PATH))
        .respond_with(html(ESERCITAZIONI_PAGE))
        .expect(2)
        .mount(&server)
        .await;
    let portal = signed_in_portal(&server).await;
    let folder = politodown::Folder::new(
        &PathBuf::from("2023/Fisica I"),
        "Esercitazioni",
        "1",
        "20",
        "3",
    );

    folder.children(&portal, false).await.expect("first fetch");
    folder.children(&portal, false).await.expect("cached");
    let children = folder.children(&portal, true).await.expect("forced fetch");
    assert_eq!(children.len(), 1);
}

#[tokio::test]
async fn test_current_videolessons_are_listed_with_details() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VIDEOSTORE_PATH))
        .and(query_param("lez", "1"))
        .respond_with(html(current_lesson("lez01.mp4", 77)))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(VIDEOSTORE_PATH))
        .and(query_param("lez", "2"))
        .respond_with(html(current_lesson("lez02.mp4", 78)))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(VIDEOSTORE_PATH))
        .and(query_param("cor", "100"))
        .respond_with(html(CURRENT_INDEX))
        .mount(&server)
        .await;
    let portal = signed_in_portal(&server).await;
    let videostore = politodown::Videostore::current(2023, "Ingegneria", "Analisi I", "100");

    let lessons = videostore
        .videolessons(&portal, false)
        .await
        .expect("videolessons should list");
    assert_eq!(lessons.len(), 2);
    assert_eq!(lessons[0].name(), "lez01.mp4");
    assert_eq!(lessons[1].name(), "lez02.mp4");
    assert_eq!(lessons[0].location(), PathBuf::from("2023/Analisi I"));
    assert_eq!(
        lessons[0].link().as_str(),
        format!("{}/videolezioni/download.php?id=77", server.uri())
    );

    let FileKind::Lesson(info) = lessons[0].kind() else {
        panic!("expected a lesson");
    };
    assert_eq!(info.name, "Introduzione");
    assert_eq!(info.date, NaiveDate::from_ymd_opt(2023, 3, 2).expect("valid date"));
    assert_eq!(info.arguments, ["Vettori"]);
    assert_eq!(info.details.get("durata").map(String::as_str), Some("01:30:00"));
}

#[tokio::test]
async fn test_legacy_videolessons_are_listed_from_elearning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(LEGACY_VIDEOSTORE_PATH))
        .and(query_param("lez", "1"))
        .respond_with(html(LEGACY_LESSON))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LEGACY_VIDEOSTORE_PATH))
        .and(query_param("inc", "456"))
        .and(query_param("token", "abcdef"))
        .respond_with(html(LEGACY_INDEX))
        .mount(&server)
        .await;
    let portal = signed_in_portal(&server).await;
    let params: politodown::LegacyParams = serde_json::from_value(serde_json::json!({
        "utente": "s123456",
        "data": "20231001",
        "token": "abcdef"
    }))
    .expect("valid params");
    let videostore = politodown::Videostore::legacy(2019, "Ingegneria", "Fisica", "456", params);

    let lessons = videostore
        .videolessons(&portal, false)
        .await
        .expect("videolessons should list");
    assert_eq!(lessons.len(), 1);
    assert_eq!(lessons[0].name(), "onde.mp4");
    assert_eq!(
        lessons[0].link().as_str(),
        format!("{}/gadgets/video/download.php?f=onde.mp4", server.uri())
    );
    let FileKind::Lesson(info) = lessons[0].kind() else {
        panic!("expected a lesson");
    };
    assert_eq!(info.date, NaiveDate::from_ymd_opt(2019, 10, 1).expect("valid date"));
    assert_eq!(info.arguments, ["Interferenza"]);
    assert_eq!(info.details.get("file").map(String::as_str), Some("onde.mp4"));
}

#[tokio::test]
async fn test_videolesson_page_error_fails_the_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(VIDEOSTORE_PATH))
        .and(query_param("lez", "1"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(VIDEOSTORE_PATH))
        .and(query_param("lez", "2"))
        .respond_with(html(current_lesson("lez02.mp4", 78)))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(VIDEOSTORE_PATH))
        .respond_with(html(CURRENT_INDEX))
        .mount(&server)
        .await;
    let portal = signed_in_portal(&server).await;
    let videostore = politodown::Videostore::current(2023, "Ingegneria", "Analisi I", "100");

    let result = videostore.videolessons(&portal, false).await;
    assert!(
        matches!(result, Err(PortalError::HttpStatus { status: 500, .. })),
        "{result:?}"
    );
}
