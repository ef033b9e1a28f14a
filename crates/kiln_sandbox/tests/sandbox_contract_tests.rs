//! Integration tests for the sandbox service contract.
//!
//! The same behavioral checks run against the in-memory backend and the
//! workspace backend, so both honor the contract the orchestrator relies on.

use std::sync::Arc;
use std::time::Duration;

use kiln_sandbox::{
    CodeIssue, CreateInstanceRequest, Envelope, InstanceHealth, LocalSandboxService,
    MockCommandResponse, SandboxError, SandboxFile, SandboxService, StaticAnalysis,
    WorkspaceSandboxService, AnalysisSection,
};
use tempfile::TempDir;

fn backends() -> Vec<(Arc<dyn SandboxService>, Option<TempDir>)> {
    let temp = TempDir::new().unwrap();
    let workspace = WorkspaceSandboxService::new(temp.path());
    vec![
        (Arc::new(LocalSandboxService::new("contract")), None),
        (Arc::new(workspace), Some(temp)),
    ]
}

/// Creating a minimal-js instance seeds exactly the five template files.
#[tokio::test]
async fn test_create_instance_seeds_minimal_js() {
    for (service, _guard) in backends() {
        let info = service
            .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
            .await
            .unwrap();
        assert!(!info.run_id.is_empty());

        let files = service.get_files(&info.run_id, None).await.unwrap();
        let mut paths: Vec<&str> = files.files.iter().map(|f| f.path.as_str()).collect();
        paths.sort_unstable();

        assert_eq!(
            paths,
            vec![
                "package.json",
                "public/app.js",
                "public/index.html",
                "public/styles.css",
                "worker/index.ts",
            ],
            "backend {}",
            service.backend_name()
        );
        assert!(files
            .get("worker/index.ts")
            .unwrap()
            .contains("app.get('/api/health'"));
    }
}

/// A written file reads back with exactly the same content.
#[tokio::test]
async fn test_write_then_read_round_trip() {
    for (service, _guard) in backends() {
        let run_id = service
            .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
            .await
            .unwrap()
            .run_id;

        let outcome = service
            .write_files(
                &run_id,
                &[SandboxFile::new("src/x.ts", "export const x=1;")],
                Some("add x"),
            )
            .await
            .unwrap();
        assert!(outcome.all_succeeded());

        let requested = vec!["src/x.ts".to_string(), "src/missing.ts".to_string()];
        let files = service.get_files(&run_id, Some(&requested)).await.unwrap();

        assert_eq!(files.files, vec![SandboxFile::new("src/x.ts", "export const x=1;")]);
    }
}

/// Writing the same path twice keeps only the latest content.
#[tokio::test]
async fn test_write_replaces_content() {
    for (service, _guard) in backends() {
        let run_id = service
            .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
            .await
            .unwrap()
            .run_id;

        for content in ["first", "second"] {
            service
                .write_files(&run_id, &[SandboxFile::new("./notes.md", content)], None)
                .await
                .unwrap();
        }

        let files = service.get_files(&run_id, None).await.unwrap();
        assert_eq!(files.get("notes.md"), Some("second"));
    }
}

/// Unknown instances fail with the canonical error envelope.
#[tokio::test]
async fn test_status_of_unknown_instance() {
    for (service, _guard) in backends() {
        let result = service.get_instance_status("nonexistent").await;
        assert!(result.as_ref().unwrap_err().is_not_found());

        let envelope: Envelope<InstanceHealth> = result.into();
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            serde_json::json!({"success": false, "error": "Instance not found"})
        );
    }
}

/// Shutdown is idempotent and the instance is gone afterwards.
#[tokio::test]
async fn test_shutdown_is_idempotent() {
    for (service, _guard) in backends() {
        let run_id = service
            .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
            .await
            .unwrap()
            .run_id;

        let first = service.shutdown_instance(&run_id).await.unwrap();
        assert!(!first.already_stopped);
        let second = service.shutdown_instance(&run_id).await.unwrap();
        assert!(second.already_stopped);

        assert!(matches!(
            service.get_instance_details(&run_id).await,
            Err(SandboxError::InstanceNotFound(_))
        ));
        assert_eq!(service.list_all_instances().await.unwrap().count, 0);
    }
}

/// An invalid path fails alone; the rest of the batch is written.
#[tokio::test]
async fn test_partial_write_failure() {
    for (service, _guard) in backends() {
        let run_id = service
            .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
            .await
            .unwrap()
            .run_id;

        let outcome = service
            .write_files(
                &run_id,
                &[
                    SandboxFile::new("../outside.txt", "x"),
                    SandboxFile::new("inside.txt", "y"),
                ],
                None,
            )
            .await
            .unwrap();

        assert_eq!(outcome.failed().len(), 1);
        assert_eq!(outcome.failed()[0].file, "../outside.txt");
        assert!(outcome.results[1].success);
    }
}

/// Unknown templates resolve to the generic fallback.
#[tokio::test]
async fn test_unknown_template_details() {
    for (service, _guard) in backends() {
        let details = service.get_template_details("no-such-template").await.unwrap();
        assert_eq!(details.files.len(), 1);
        assert_eq!(details.files[0].path, "package.json");
        assert_eq!(details.files[0].content, "{}");
    }
}

/// Commands run in order and a failure does not stop later commands.
#[tokio::test]
async fn test_workspace_commands_run_in_order() {
    let temp = TempDir::new().unwrap();
    let service = WorkspaceSandboxService::new(temp.path());
    let run_id = service
        .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
        .await
        .unwrap()
        .run_id;

    let commands = vec![
        "echo first".to_string(),
        "exit 3".to_string(),
        "cat package.json".to_string(),
    ];
    let results = service.execute_commands(&run_id, &commands, None).await.unwrap();

    assert_eq!(results.results.len(), 3);
    assert!(results.results[0].success);
    assert_eq!(results.results[0].output.trim(), "first");
    assert_eq!(results.results[1].exit_code, 3);
    assert!(results.results[2].success);
    assert!(results.results[2].output.contains("minimal-js"));

    // A failing command shows up in its result and the logs, not as a runtime error.
    let errors = service.get_instance_errors(&run_id).await.unwrap();
    assert!(!errors.has_errors);
    assert_eq!(service.clear_instance_errors(&run_id).await.unwrap().cleared, 0);
    let logs = service.get_logs(&run_id).await.unwrap();
    assert!(logs.stdout.contains("first"));
}

/// A command that cannot be started fails on its own; the batch keeps going.
#[tokio::test]
async fn test_workspace_unspawnable_command_is_a_failed_result() {
    let temp = TempDir::new().unwrap();
    let service = WorkspaceSandboxService::new(temp.path());
    let run_id = service
        .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
        .await
        .unwrap()
        .run_id;

    let commands = vec![
        "echo first".to_string(),
        "echo bad\0byte".to_string(),
        "echo third".to_string(),
    ];
    let results = service.execute_commands(&run_id, &commands, None).await.unwrap();

    assert_eq!(results.results.len(), 3);
    assert!(results.results[0].success);
    assert!(!results.results[1].success);
    assert_eq!(results.results[1].exit_code, -1);
    assert!(!results.results[1].output.is_empty());
    assert!(results.results[2].success);
    assert_eq!(results.results[2].output.trim(), "third");
}

/// Template names never place an instance outside the workspace root.
#[tokio::test]
async fn test_workspace_instance_stays_under_root() {
    let temp = TempDir::new().unwrap();
    let service = WorkspaceSandboxService::new(temp.path());
    let info = service
        .create_instance(CreateInstanceRequest::new("../escaped", "p"))
        .await
        .unwrap();

    assert!(!info.run_id.contains(".."));
    assert!(!info.run_id.contains('/'));
    let dir = service.instance_dir(&info.run_id).unwrap();
    let root = temp.path().canonicalize().unwrap();
    assert!(dir.canonicalize().unwrap().starts_with(&root));

    service.shutdown_instance(&info.run_id).await.unwrap();
    assert!(root.is_dir());
    assert!(!dir.exists());
}

/// A command exceeding its timeout is reported as a failed result.
#[tokio::test]
async fn test_workspace_command_timeout() {
    let temp = TempDir::new().unwrap();
    let service = WorkspaceSandboxService::new(temp.path());
    let run_id = service
        .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
        .await
        .unwrap()
        .run_id;

    let commands = vec!["sleep 5".to_string(), "echo done".to_string()];
    let results = service
        .execute_commands(&run_id, &commands, Some(Duration::from_millis(200)))
        .await
        .unwrap();

    assert!(!results.results[0].success);
    assert_eq!(results.results[0].exit_code, 124);
    assert!(results.results[1].success);
}

/// Lint output is parsed into issues and filtered by file.
#[tokio::test]
async fn test_workspace_static_analysis() {
    let temp = TempDir::new().unwrap();
    let service = WorkspaceSandboxService::new(temp.path()).with_lint_command(
        "printf 'src/a.ts:1:5: error: no-undef\\nsrc/b.ts:2:1: warning: prefer-const\\n'",
    );
    let run_id = service
        .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
        .await
        .unwrap()
        .run_id;

    let analysis = service.run_static_analysis(&run_id, None).await.unwrap();
    assert_eq!(analysis.lint.summary.error_count, 1);
    assert_eq!(analysis.lint.summary.warning_count, 1);
    assert!(analysis.typecheck.issues.is_empty());

    let only_b = vec!["src/b.ts".to_string()];
    let filtered = service.run_static_analysis(&run_id, Some(&only_b)).await.unwrap();
    assert_eq!(filtered.error_count(), 0);
    assert_eq!(filtered.lint.issues.len(), 1);
}

/// Deploy is not available without a hosting target.
#[tokio::test]
async fn test_workspace_deploy_unsupported() {
    let temp = TempDir::new().unwrap();
    let service = WorkspaceSandboxService::new(temp.path());
    let run_id = service
        .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
        .await
        .unwrap()
        .run_id;

    assert!(matches!(
        service.deploy(&run_id).await,
        Err(SandboxError::Unsupported { .. })
    ));
}

/// The mock backend publishes to deterministic mock URLs.
#[tokio::test]
async fn test_local_deploy_and_analysis() {
    let service = LocalSandboxService::new("contract")
        .add_response(MockCommandResponse::success("ok"));
    let run_id = service
        .create_instance(CreateInstanceRequest::new("minimal-js", "proj1"))
        .await
        .unwrap()
        .run_id;

    let deployed = service.deploy(&run_id).await.unwrap();
    assert_eq!(deployed.deployed_url, format!("https://{}.mock.deploy", run_id));

    service.set_static_analysis(StaticAnalysis {
        lint: AnalysisSection::default(),
        typecheck: AnalysisSection::from_issues(vec![CodeIssue::error("src/x.ts", 3, "TS2304")]),
    });
    let analysis = service.run_static_analysis(&run_id, None).await.unwrap();
    assert_eq!(analysis.error_count(), 1);
    assert!(!analysis.is_clean());
}
