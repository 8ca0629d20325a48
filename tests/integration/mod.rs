// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{zip_bytes, zip_bytes_with, RemoteFixture, RepoFixture, PROJECT_ID};

use anyhow::Result;
use pretty_assertions::assert_eq;
use sharemirror::{
    mirror::fingerprint::{fingerprint, Fingerprint},
    DeleteMode, FailureKind, Git2Stager, MemorySecretStore, Mirror, RunState, SyncConfig,
    SyncOutcome, SyncSettings,
};
use std::{
    fs::{create_dir, metadata, read_dir, read_to_string, write},
    io::Cursor,
    path::Path,
};
use tempfile::TempDir;
use zip::{CompressionMethod, ZipArchive};

fn settings(remote: &RemoteFixture, work_dir: &Path, delete: DeleteMode) -> SyncSettings {
    SyncSettings {
        config: SyncConfig {
            project_id: PROJECT_ID.into(),
            username: "u1".into(),
            remote_base_url: remote.uri(),
        },
        config_file_name: "sync.json".into(),
        work_dir: work_dir.to_path_buf(),
        allow_list: None,
        delete,
        download_dir: None,
    }
}

fn secrets() -> MemorySecretStore {
    MemorySecretStore::with_secret("u1", "hunter2")
}

fn archive_fingerprint(archive: &[u8]) -> Result<Fingerprint> {
    let mut archive = ZipArchive::new(Cursor::new(archive.to_vec()))?;
    Ok(fingerprint(&mut archive)?)
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(read_dir(path)?.next().is_none())
}

#[test]
fn first_run_mirrors_archive() -> Result<()> {
    let work_dir = TempDir::new()?;
    let repo = RepoFixture::new(work_dir.path())?;
    let archive = zip_bytes(&[("a.txt", "alpha"), ("b/c.txt", "gamma")])?;
    let expect_fingerprint = archive_fingerprint(&archive)?;

    let remote = RemoteFixture::new()?;
    remote.serve_login_page();
    remote.accept_login(1);
    remote.serve_archive(archive, 1);

    let stager = Git2Stager::discover(work_dir.path())?;
    let mirror = Mirror::new(
        settings(&remote, work_dir.path(), DeleteMode::ReportOnly),
        secrets(),
        stager,
    );
    let SyncOutcome::Synced { fingerprint, report } = mirror.run()? else {
        panic!("expected archive to be applied");
    };

    assert_eq!(fingerprint, expect_fingerprint);
    assert_eq!(report.extracted, vec!["a.txt".to_string(), "b/c.txt".to_string()]);
    assert_eq!(read_to_string(work_dir.path().join("a.txt"))?, "alpha");
    assert_eq!(read_to_string(work_dir.path().join("b/c.txt"))?, "gamma");
    assert!(metadata(work_dir.path().join("a.txt"))?.permissions().readonly());
    assert!(metadata(work_dir.path().join("b/c.txt"))?.permissions().readonly());
    assert!(repo.is_staged("a.txt")?);
    assert!(repo.is_staged("b/c.txt")?);

    let state = RunState::load(work_dir.path())?;
    assert_eq!(
        state,
        RunState {
            consecutive_unchanged_runs: 0,
            last_content_fingerprint: Some(expect_fingerprint.into()),
        }
    );

    Ok(())
}

#[test]
fn unchanged_archive_leaves_work_dir_alone() -> Result<()> {
    let work_dir = TempDir::new()?;
    let archive = zip_bytes(&[("main.tex", "v1")])?;

    let remote = RemoteFixture::new()?;
    remote.serve_login_page();
    remote.accept_login(2);
    remote.serve_archive(archive.clone(), 2);

    let mirror = Mirror::new(
        settings(&remote, work_dir.path(), DeleteMode::Remove),
        secrets(),
        None::<Git2Stager>,
    );
    assert!(matches!(mirror.run()?, SyncOutcome::Synced { .. }));
    let main_tex = work_dir.path().join("main.tex");
    let modified = metadata(&main_tex)?.modified()?;

    // A second reconcile in remove mode would delete this file.
    write(work_dir.path().join("notes.txt"), "local")?;
    let outcome = mirror.run()?;
    assert_eq!(
        outcome,
        SyncOutcome::Unchanged {
            fingerprint: archive_fingerprint(&archive)?,
        }
    );
    assert_eq!(read_to_string(work_dir.path().join("notes.txt"))?, "local");
    assert_eq!(read_to_string(&main_tex)?, "v1");
    assert!(metadata(&main_tex)?.permissions().readonly());
    assert_eq!(metadata(&main_tex)?.modified()?, modified);

    let state = RunState::load(work_dir.path())?;
    assert_eq!(state.consecutive_unchanged_runs, 1);
    assert_eq!(
        state.last_content_fingerprint,
        Some(archive_fingerprint(&archive)?.to_string())
    );

    Ok(())
}

#[test]
fn repacked_archive_with_same_content_is_unchanged() -> Result<()> {
    let work_dir = TempDir::new()?;
    let entries = [("main.tex", "\\documentclass{article} % v1 v1 v1 v1")];
    let first = zip_bytes_with(&entries, CompressionMethod::Deflated)?;
    let second = zip_bytes_with(&entries, CompressionMethod::Stored)?;
    assert_ne!(first, second);

    let remote = RemoteFixture::new()?;
    remote.serve_login_page();
    remote.accept_login(2);
    remote.serve_archive_once(first.clone());
    remote.serve_archive_once(second);

    let mirror = Mirror::new(
        settings(&remote, work_dir.path(), DeleteMode::Remove),
        secrets(),
        None::<Git2Stager>,
    );
    assert!(matches!(mirror.run()?, SyncOutcome::Synced { .. }));
    assert_eq!(
        mirror.run()?,
        SyncOutcome::Unchanged {
            fingerprint: archive_fingerprint(&first)?,
        }
    );

    Ok(())
}

#[test]
fn throttled_run_skips_remote() -> Result<()> {
    let work_dir = TempDir::new()?;
    let state = RunState {
        consecutive_unchanged_runs: 4,
        last_content_fingerprint: Some("abc".into()),
    };
    state.store(work_dir.path())?;

    let remote = RemoteFixture::new()?;
    remote.expect_no_requests();

    let mirror = Mirror::new(
        settings(&remote, work_dir.path(), DeleteMode::ReportOnly),
        secrets(),
        None::<Git2Stager>,
    );
    assert_eq!(mirror.run()?, SyncOutcome::Skipped { unchanged_runs: 5 });

    let state = RunState::load(work_dir.path())?;
    assert_eq!(state.consecutive_unchanged_runs, 5);
    assert_eq!(state.last_content_fingerprint, Some("abc".into()));

    Ok(())
}

#[test]
fn missing_secret_is_auth_failure() -> Result<()> {
    let work_dir = TempDir::new()?;
    let remote = RemoteFixture::new()?;
    remote.serve_login_page();
    remote.accept_login(0);
    remote.expect_no_download();

    let mirror = Mirror::new(
        settings(&remote, work_dir.path(), DeleteMode::ReportOnly),
        MemorySecretStore::new(),
        None::<Git2Stager>,
    );
    let error = mirror.run().expect_err("run without secret must fail");
    assert_eq!(error.kind(), FailureKind::Auth);
    assert_eq!(RunState::load(work_dir.path())?, RunState::default());
    assert!(!work_dir.path().join(".sharemirror.json").exists());

    Ok(())
}

#[test]
fn rejected_login_is_auth_failure() -> Result<()> {
    let work_dir = TempDir::new()?;
    let remote = RemoteFixture::new()?;
    remote.serve_login_page();
    remote.reject_login();
    remote.expect_no_download();

    let mirror = Mirror::new(
        settings(&remote, work_dir.path(), DeleteMode::ReportOnly),
        secrets(),
        None::<Git2Stager>,
    );
    let error = mirror.run().expect_err("rejected login must fail");
    assert_eq!(error.kind(), FailureKind::Auth);

    Ok(())
}

#[test]
fn unreachable_login_page_is_auth_failure() -> Result<()> {
    let work_dir = TempDir::new()?;
    let remote = RemoteFixture::new()?;
    remote.refuse_login_page();
    remote.accept_login(0);
    remote.expect_no_download();

    let mirror = Mirror::new(
        settings(&remote, work_dir.path(), DeleteMode::ReportOnly),
        secrets(),
        None::<Git2Stager>,
    );
    let error = mirror.run().expect_err("failing login page must fail");
    assert_eq!(error.kind(), FailureKind::Auth);
    assert!(!work_dir.path().join(".sharemirror.json").exists());

    Ok(())
}

#[test]
fn login_page_without_csrf_is_auth_failure() -> Result<()> {
    let work_dir = TempDir::new()?;
    let remote = RemoteFixture::new()?;
    remote.serve_login_page_without_csrf();
    remote.accept_login(0);
    remote.expect_no_download();

    let mirror = Mirror::new(
        settings(&remote, work_dir.path(), DeleteMode::ReportOnly),
        secrets(),
        None::<Git2Stager>,
    );
    let error = mirror.run().expect_err("login page without token must fail");
    assert_eq!(error.kind(), FailureKind::Auth);
    assert!(!work_dir.path().join(".sharemirror.json").exists());

    Ok(())
}

#[test]
fn downloaded_archive_is_removed_after_run() -> Result<()> {
    let work_dir = TempDir::new()?;
    let download_dir = TempDir::new()?;
    let archive = zip_bytes(&[("main.tex", "v1")])?;

    let remote = RemoteFixture::new()?;
    remote.serve_login_page();
    remote.accept_login(2);
    remote.serve_archive(archive, 2);

    let mut settings = settings(&remote, work_dir.path(), DeleteMode::ReportOnly);
    settings.download_dir = Some(download_dir.path().to_path_buf());
    let mirror = Mirror::new(settings, secrets(), None::<Git2Stager>);

    assert!(matches!(mirror.run()?, SyncOutcome::Synced { .. }));
    assert!(is_empty_dir(download_dir.path())?);
    assert!(matches!(mirror.run()?, SyncOutcome::Unchanged { .. }));
    assert!(is_empty_dir(download_dir.path())?);

    Ok(())
}

#[test]
fn downloaded_archive_is_removed_after_failure() -> Result<()> {
    let cases = [
        (b"this is not a zip archive".to_vec(), FailureKind::Network),
        (zip_bytes(&[("../escape.txt", "outside")])?, FailureKind::Io),
    ];
    for (archive, expect_kind) in cases {
        let work_dir = TempDir::new()?;
        let download_dir = TempDir::new()?;

        let remote = RemoteFixture::new()?;
        remote.serve_login_page();
        remote.accept_login(1);
        remote.serve_archive(archive, 1);

        let mut settings = settings(&remote, work_dir.path(), DeleteMode::Remove);
        settings.download_dir = Some(download_dir.path().to_path_buf());
        let mirror = Mirror::new(settings, secrets(), None::<Git2Stager>);

        let error = mirror.run().expect_err("broken archive must fail");
        assert_eq!(error.kind(), expect_kind);
        assert!(is_empty_dir(download_dir.path())?);
        assert!(!work_dir.path().join(".sharemirror.json").exists());
    }

    Ok(())
}

#[test]
fn refused_download_is_network_failure() -> Result<()> {
    let work_dir = TempDir::new()?;
    let remote = RemoteFixture::new()?;
    remote.serve_login_page();
    remote.accept_login(1);
    remote.refuse_archive();

    let mirror = Mirror::new(
        settings(&remote, work_dir.path(), DeleteMode::ReportOnly),
        secrets(),
        None::<Git2Stager>,
    );
    let error = mirror.run().expect_err("refused download must fail");
    assert_eq!(error.kind(), FailureKind::Network);
    assert_eq!(RunState::load(work_dir.path())?, RunState::default());

    Ok(())
}

#[test]
fn stale_files_follow_delete_mode() -> Result<()> {
    for (delete, expect_exists) in [(DeleteMode::ReportOnly, true), (DeleteMode::Remove, false)] {
        let work_dir = TempDir::new()?;
        create_dir(work_dir.path().join("old"))?;
        write(work_dir.path().join("old/stale.txt"), "gone remotely")?;
        write(work_dir.path().join(".gitignore"), "build/\n*.log\n")?;
        write(work_dir.path().join("sync.json"), "{}")?;
        write(work_dir.path().join("paper.log"), "latexmk output")?;

        let remote = RemoteFixture::new()?;
        remote.serve_login_page();
        remote.accept_login(1);
        remote.serve_archive(zip_bytes(&[("main.tex", "v1")])?, 1);

        let mirror = Mirror::new(
            settings(&remote, work_dir.path(), delete),
            secrets(),
            None::<Git2Stager>,
        );
        let SyncOutcome::Synced { report, .. } = mirror.run()? else {
            panic!("expected archive to be applied");
        };

        assert_eq!(work_dir.path().join("old/stale.txt").exists(), expect_exists);
        assert!(work_dir.path().join(".gitignore").exists());
        assert!(work_dir.path().join("sync.json").exists());
        assert!(work_dir.path().join("paper.log").exists());
        match delete {
            DeleteMode::ReportOnly => {
                assert_eq!(report.should_delete, vec!["old/stale.txt".to_string()]);
                assert!(report.removed.is_empty());
            }
            DeleteMode::Remove => {
                assert_eq!(report.removed, vec!["old/stale.txt".to_string()]);
                assert!(report.should_delete.is_empty());
            }
        }
    }

    Ok(())
}

#[test]
fn missing_allow_list_fails_before_remote() -> Result<()> {
    let work_dir = TempDir::new()?;
    let remote = RemoteFixture::new()?;
    remote.expect_no_requests();

    let mut settings = settings(&remote, work_dir.path(), DeleteMode::Remove);
    settings.allow_list = Some(work_dir.path().join("allow.txt"));
    let mirror = Mirror::new(settings, secrets(), None::<Git2Stager>);

    let error = mirror.run().expect_err("missing allow-list must fail");
    assert_eq!(error.kind(), FailureKind::Config);
    assert!(!work_dir.path().join(".sharemirror.json").exists());

    Ok(())
}

#[test]
fn allow_list_protects_local_files() -> Result<()> {
    let work_dir = TempDir::new()?;
    let allow_list = work_dir.path().join("allow.txt");
    write(&allow_list, "# local only\nnotes/*\n")?;
    write(work_dir.path().join("draft.tex"), "local draft")?;
    create_dir(work_dir.path().join("notes"))?;
    write(work_dir.path().join("notes/todo.md"), "- finish")?;

    let remote = RemoteFixture::new()?;
    remote.serve_login_page();
    remote.accept_login(1);
    remote.serve_archive(zip_bytes(&[("main.tex", "v1")])?, 1);

    let mut settings = settings(&remote, work_dir.path(), DeleteMode::Remove);
    settings.allow_list = Some(allow_list.clone());
    let mirror = Mirror::new(settings, secrets(), None::<Git2Stager>);
    let SyncOutcome::Synced { report, .. } = mirror.run()? else {
        panic!("expected archive to be applied");
    };

    assert_eq!(report.removed, vec!["draft.tex".to_string()]);
    assert!(allow_list.exists());
    assert!(work_dir.path().join("notes/todo.md").exists());

    Ok(())
}
