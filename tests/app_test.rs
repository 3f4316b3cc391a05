//! 应用启动、清单与测试隔离的集成测试

use parking_lot::Mutex;
use slicekit::discovery::AutoRegistration;
use slicekit::{
    AppManifest, Application, BootMode, ContainerError, GatewayHandle, ProviderBuilder, ProviderState, Resolution,
};
use std::io::Write;
use std::sync::Arc;

/// 路由层取到的动作
struct ShowBook {
    gateway: Arc<GatewayHandle>,
}

struct SendNewsletter;

#[test]
fn a_single_route_starts_only_the_providers_it_needs() {
    let app = Application::builder("app")
        .setting("database_url", "mem://books")
        .build()
        .unwrap();
    let db = app.root().register_provider(ProviderBuilder::database()).unwrap();
    let mailer = app
        .root()
        .register_provider(ProviderBuilder::new("mailer").on_start(|ctx| {
            ctx.register_value("client", "smtp");
            Ok(())
        }))
        .unwrap();

    app.root()
        .register(
            "actions.books.show",
            Resolution::factory(|resolver| {
                Ok(ShowBook {
                    gateway: resolver.resolve_as::<GatewayHandle>("db.gateway")?,
                })
            }),
        )
        .unwrap();
    app.root()
        .register(
            "actions.newsletter.send",
            Resolution::factory(|resolver| {
                resolver.resolve_as::<&str>("mailer.client")?;
                Ok(SendNewsletter)
            }),
        )
        .unwrap();

    let action = app.root().resolve_as::<ShowBook>("actions.books.show").unwrap();
    assert_eq!(action.gateway.config().target, "mem://books");

    assert_eq!(db.state(), ProviderState::Started);
    assert_eq!(mailer.state(), ProviderState::Registered);
    assert!(!app.is_booted());
}

#[test]
fn boot_starts_everything_and_shutdown_runs_in_reverse() {
    let app = Application::builder("app").build().unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));

    for (slice, name) in [("app", "logger"), ("app/admin", "search"), ("app/admin/reports", "exporter")] {
        let target = if slice == "app" {
            app.root().clone()
        } else {
            let (parent, child) = slice.rsplit_once('/').unwrap();
            app.slice(parent).unwrap().register_slice(child).unwrap()
        };
        let (on_start, on_stop) = (events.clone(), events.clone());
        target
            .register_provider(
                ProviderBuilder::new(name)
                    .on_start(move |ctx| {
                        on_start.lock().push(format!("start {}", ctx.provider_name()));
                        Ok(())
                    })
                    .on_stop(move |ctx| {
                        on_stop.lock().push(format!("stop {}", ctx.provider_name()));
                        Ok(())
                    }),
            )
            .unwrap();
    }

    app.boot().unwrap();
    app.boot().unwrap();
    assert!(app.providers().iter().all(|p| p.state() == ProviderState::Started));

    app.shutdown().unwrap();
    assert_eq!(
        *events.lock(),
        vec![
            "start app:logger",
            "start app/admin:search",
            "start app/admin/reports:exporter",
            "stop app/admin/reports:exporter",
            "stop app/admin:search",
            "stop app:logger",
        ]
    );
}

#[test]
fn reset_isolates_consecutive_runs() {
    let app = Application::builder("app")
        .setting("database_url", "mem://books")
        .build()
        .unwrap();
    app.root().register_provider(ProviderBuilder::database()).unwrap();
    let admin = app.root().register_slice("admin").unwrap();
    admin.enable_import("db");

    app.boot().unwrap();
    let first = admin.resolve_as::<GatewayHandle>("db.gateway").unwrap();
    assert_eq!(app.context().resources().len(), 1);

    app.reset().unwrap();
    assert!(app.context().resources().is_empty());
    assert!(!admin.registry().contains_key("db.gateway"));
    assert!(!admin.registry().is_frozen());

    let second = admin.resolve_as::<GatewayHandle>("db.gateway").unwrap();
    assert!(!first.same_resource(&second));
    assert_eq!(app.context().resources().opened_count(), 2);
}

const MANIFEST: &str = r#"
name = "bookshelf"
boot_mode = "eager"

[settings]
database_url = "mem://bookshelf"

[[providers]]
name = "db"

[[slices]]
name = "admin"
import_families = ["db"]

[[slices]]
name = "main"

[[slices.providers]]
name = "db"
extensions = ["strict_mode"]
"#;

#[test]
fn manifest_on_disk_boots_the_declared_tree() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MANIFEST.as_bytes()).unwrap();

    let manifest = AppManifest::load(file.path()).unwrap();
    let app = Application::from_manifest(&manifest).unwrap();
    assert_eq!(app.name(), "bookshelf");
    assert_eq!(app.context().boot_mode(), BootMode::Eager);

    app.boot().unwrap();

    let root_gateway = app.root().resolve_as::<GatewayHandle>("db.gateway").unwrap();
    let admin_gateway = app.slice("admin").unwrap().resolve_as::<GatewayHandle>("db.gateway").unwrap();
    let main_gateway = app.slice("main").unwrap().resolve_as::<GatewayHandle>("db.gateway").unwrap();

    assert!(root_gateway.same_resource(&admin_gateway));
    assert!(!root_gateway.same_resource(&main_gateway));
    assert_eq!(app.context().resources().len(), 2);
}

#[test]
fn malformed_manifest_reports_its_origin() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"name = [").unwrap();

    match AppManifest::load(file.path()).unwrap_err() {
        ContainerError::Manifest { origin, .. } => {
            assert_eq!(origin, file.path().display().to_string());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn auto_registered_components_boot_eagerly() {
    let app = Application::builder("app").boot_mode(BootMode::Eager).build().unwrap();
    let admin = app.root().register_slice("admin").unwrap();
    let inflector = app.root().resolve_as::<Arc<dyn slicekit::inflector::Inflector>>("inflector").unwrap();

    let auto = AutoRegistration::new(inflector.as_ref().clone());
    let components = auto.discover(
        ["repos/BookRepo.rs", "structs/book.rs", "operations/create_book.rs"],
        |key| Resolution::value(key.to_string()),
    );
    auto.register_all(&admin, components).unwrap();

    app.boot().unwrap();
    assert_eq!(admin.registry().keys(), vec!["repos.book_repo", "operations.create_book"]);
    assert!(admin.registry().keys().iter().all(|key| admin.registry().record(key).unwrap().is_memoized()));
}
