use anyhow::Result;
use std::time::Duration;

use crate::helpers::test_harness::{expect_no_event, next_event, TestHarness};

#[tokio::test]
async fn test_create_overwrite_delete_sequence() -> Result<()> {
    let harness = TestHarness::new()?;
    let mut sub = harness.subscribe("client")?;

    let (event, body) = next_event(&mut sub).await?;
    assert_eq!(event, "initial");
    assert_eq!(body["data"]["path"], ".");

    harness.create_file("a.txt", "hi")?;

    let (event, body) = next_event(&mut sub).await?;
    assert_eq!(event, "file_tree_diff");
    assert_eq!(body["data"]["added"][0]["path"], "a.txt");
    assert_eq!(body["data"]["added"][0]["type"], "file");
    assert_eq!(body["data"]["added"][0]["metadata"]["size"], 2);

    let (event, body) = next_event(&mut sub).await?;
    assert_eq!(event, "file_content_diff");
    assert_eq!(body["data"]["path"], "a.txt");
    assert_eq!(body["data"]["diffType"], "full");
    assert_eq!(body["data"]["content"], "hi");

    harness.settle().await;
    harness.overwrite_file("a.txt", "hi")?;

    let (event, body) = next_event(&mut sub).await?;
    assert_eq!(event, "file_tree_diff");
    assert_eq!(body["data"]["modified"][0]["path"], "a.txt");

    harness.settle().await;
    std::fs::remove_file(harness.path().join("a.txt"))?;

    // the unchanged overwrite produced no content diff, so the delete comes next
    let (event, body) = next_event(&mut sub).await?;
    assert_eq!(event, "file_tree_diff");
    assert_eq!(body["data"]["removed"][0], "a.txt");

    expect_no_event(&mut sub, Duration::from_millis(300)).await;
    Ok(())
}

#[tokio::test]
async fn test_plain_writes_deliver_full_content() -> Result<()> {
    let harness = TestHarness::new()?;
    let mut sub = harness.subscribe("client")?;
    next_event(&mut sub).await?;

    // fs::write truncates then writes, so the file briefly exists empty
    for i in 0..5 {
        let name = format!("plain-{}.txt", i);
        let path = harness.path().join(&name);

        std::fs::write(&path, "hi")?;

        let (event, body) = next_event(&mut sub).await?;
        assert_eq!(event, "file_tree_diff");
        assert_eq!(body["data"]["added"][0]["path"], name.as_str());
        assert_eq!(body["data"]["added"][0]["metadata"]["size"], 2);

        let (event, body) = next_event(&mut sub).await?;
        assert_eq!(event, "file_content_diff");
        assert_eq!(body["data"]["path"], name.as_str());
        assert_eq!(body["data"]["content"], "hi");

        harness.settle().await;
        std::fs::write(&path, "hi")?;

        let (event, body) = next_event(&mut sub).await?;
        assert_eq!(event, "file_tree_diff");
        assert_eq!(body["data"]["modified"][0]["path"], name.as_str());
        assert_eq!(body["data"]["modified"][0]["metadata"]["size"], 2);

        harness.settle().await;
        std::fs::remove_file(&path)?;

        // same bytes rewritten: no content diff ahead of the delete
        let (event, body) = next_event(&mut sub).await?;
        assert_eq!(event, "file_tree_diff");
        assert_eq!(body["data"]["removed"][0], name.as_str());

        harness.settle().await;
    }

    expect_no_event(&mut sub, Duration::from_millis(300)).await;
    Ok(())
}

#[tokio::test]
async fn test_changed_bytes_produce_content_diff() -> Result<()> {
    let harness = TestHarness::new()?;
    std::fs::write(harness.path().join("notes.md"), "one")?;
    let mut sub = harness.subscribe("client")?;
    next_event(&mut sub).await?;

    harness.overwrite_file("notes.md", "two")?;

    let (event, _) = next_event(&mut sub).await?;
    assert_eq!(event, "file_tree_diff");
    let (event, body) = next_event(&mut sub).await?;
    assert_eq!(event, "file_content_diff");
    assert_eq!(body["data"]["content"], "two");
    Ok(())
}

#[tokio::test]
async fn test_rename_is_reported_as_move() -> Result<()> {
    let harness = TestHarness::new()?;
    std::fs::write(harness.path().join("old.txt"), "x")?;
    let mut sub = harness.subscribe("client")?;
    next_event(&mut sub).await?;

    std::fs::rename(harness.path().join("old.txt"), harness.path().join("new.txt"))?;

    let (event, body) = next_event(&mut sub).await?;
    assert_eq!(event, "file_tree_diff");
    assert_eq!(body["data"]["moved"][0]["oldPath"], "old.txt");
    assert_eq!(body["data"]["moved"][0]["newPath"], "new.txt");

    // moves carry no content
    expect_no_event(&mut sub, Duration::from_millis(300)).await;
    Ok(())
}

#[tokio::test]
async fn test_excluded_paths_are_silent() -> Result<()> {
    let harness = TestHarness::new()?;
    std::fs::create_dir_all(harness.path().join("node_modules/pkg"))?;
    std::fs::create_dir_all(harness.path().join(".git"))?;
    let mut sub = harness.subscribe("client")?;
    next_event(&mut sub).await?;

    std::fs::write(harness.path().join("node_modules/pkg/index.js"), "x")?;
    std::fs::write(harness.path().join(".git/HEAD"), "ref")?;
    std::fs::write(harness.path().join(".env"), "SECRET=1")?;
    expect_no_event(&mut sub, Duration::from_millis(300)).await;

    harness.create_file("visible.txt", "ok")?;
    let (_, body) = next_event(&mut sub).await?;
    assert_eq!(body["data"]["added"][0]["path"], "visible.txt");
    Ok(())
}

#[tokio::test]
async fn test_nested_file_uses_relative_path() -> Result<()> {
    let harness = TestHarness::new()?;
    let mut sub = harness.subscribe("client")?;
    next_event(&mut sub).await?;

    std::fs::create_dir_all(harness.path().join("src/deep"))?;
    // give the recursive watch time to pick up the new directories
    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.create_file("src/deep/mod.rs", "mod x;")?;

    let (event, body) = next_event(&mut sub).await?;
    assert_eq!(event, "file_tree_diff");
    assert_eq!(body["data"]["added"][0]["path"], "src/deep/mod.rs");
    Ok(())
}

#[tokio::test]
async fn test_initial_snapshot_reflects_existing_tree() -> Result<()> {
    let harness = TestHarness::new()?;
    std::fs::create_dir_all(harness.path().join("src"))?;
    std::fs::write(harness.path().join("src/lib.rs"), "")?;
    std::fs::write(harness.path().join("Cargo.toml"), "[package]")?;

    let mut sub = harness.subscribe("client")?;
    let (event, body) = next_event(&mut sub).await?;

    assert_eq!(event, "initial");
    assert_eq!(body["type"], "initial");
    let children = body["data"]["children"].as_array().unwrap();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0]["name"], "Cargo.toml");
    assert_eq!(children[1]["children"][0]["path"], "src/lib.rs");
    Ok(())
}
