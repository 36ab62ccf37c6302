use std::sync::Arc;

use super::*;

#[tokio::test]
async fn unknown_session_has_empty_history() {
    let memory = ConversationMemory::new(4);
    assert!(memory.get_history("missing").await.is_empty());
    assert_eq!(memory.session_count().await, 0);
}

#[tokio::test]
async fn window_keeps_most_recent_turns() {
    let memory = ConversationMemory::new(4);
    for i in 0..5 {
        memory.append("s1", Role::User, format!("turn {i}")).await;
    }

    let history = memory.get_history("s1").await;
    let texts: Vec<&str> = history.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["turn 1", "turn 2", "turn 3", "turn 4"]);

    let ordinals: Vec<u64> = history.iter().map(|t| t.ordinal).collect();
    assert_eq!(ordinals, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn exchanges_alternate_roles() {
    let memory = ConversationMemory::new(4);
    memory.append_exchange("s1", "q1", "a1").await;
    memory.append_exchange("s1", "q2", "a2").await;
    memory.append_exchange("s1", "q3", "a3").await;

    let history = memory.get_history("s1").await;
    let turns: Vec<(Role, &str)> = history.iter().map(|t| (t.role, t.text.as_str())).collect();
    assert_eq!(
        turns,
        vec![
            (Role::User, "q2"),
            (Role::Assistant, "a2"),
            (Role::User, "q3"),
            (Role::Assistant, "a3"),
        ]
    );
}

#[tokio::test]
async fn sessions_are_isolated_and_clearable() {
    let memory = ConversationMemory::new(4);
    memory.append_exchange("a", "question a", "answer a").await;
    memory.append_exchange("b", "question b", "answer b").await;

    assert_eq!(memory.session_count().await, 2);
    assert_eq!(memory.get_history("a").await[0].text, "question a");
    assert_eq!(memory.get_history("b").await[0].text, "question b");

    assert!(memory.clear("a").await);
    assert!(!memory.clear("a").await);
    assert!(memory.get_history("a").await.is_empty());
    assert_eq!(memory.get_history("b").await.len(), 2);
}

#[tokio::test]
async fn zero_window_keeps_nothing() {
    let memory = ConversationMemory::new(0);
    memory.append_exchange("s", "q", "a").await;
    assert!(memory.get_history("s").await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_exchanges_stay_paired() {
    let memory = Arc::new(ConversationMemory::new(100));

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let memory = Arc::clone(&memory);
            tokio::spawn(async move {
                memory
                    .append_exchange("shared", format!("q{i}"), format!("a{i}"))
                    .await;
            })
        })
        .collect();
    for task in tasks {
        task.await.expect("task should finish");
    }

    let history = memory.get_history("shared").await;
    assert_eq!(history.len(), 40);
    for pair in history.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
        assert_eq!(pair[0].text[1..], pair[1].text[1..]);
    }
}

#[test]
fn session_ids_are_unique() {
    assert_ne!(
        ConversationMemory::new_session_id(),
        ConversationMemory::new_session_id()
    );
}

#[tokio::test]
async fn least_recently_used_session_is_dropped_at_the_limit() {
    let memory = ConversationMemory::new(4).with_max_sessions(2);
    memory.append_exchange("first", "q", "a").await;
    memory.append_exchange("second", "q", "a").await;

    // Reading "first" makes "second" the stalest
    assert_eq!(memory.get_history("first").await.len(), 2);
    memory.append_exchange("third", "q", "a").await;

    assert_eq!(memory.session_count().await, 2);
    assert!(memory.get_history("second").await.is_empty());
    assert_eq!(memory.get_history("first").await.len(), 2);
    assert_eq!(memory.get_history("third").await.len(), 2);
}

#[tokio::test]
async fn saved_sessions_continue_in_a_new_memory() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let memory = ConversationMemory::new(4);
    memory.append_exchange("abc-123", "q1", "a1").await;
    memory.append_exchange("abc-123", "q2", "a2").await;
    memory
        .save_session(dir.path(), "abc-123")
        .await
        .expect("should save");

    let resumed = ConversationMemory::new(4);
    assert!(
        resumed
            .load_session(dir.path(), "abc-123")
            .await
            .expect("should load")
    );
    resumed.append_exchange("abc-123", "q3", "a3").await;

    let history = resumed.get_history("abc-123").await;
    let texts: Vec<&str> = history.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["q2", "a2", "q3", "a3"]);
    assert_eq!(history.last().map(|t| t.ordinal), Some(5));

    assert!(
        !resumed
            .load_session(dir.path(), "never-saved")
            .await
            .expect("missing file is not an error")
    );
}

#[tokio::test]
async fn session_ids_must_be_plain_file_names() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let memory = ConversationMemory::new(4);

    for id in ["../escape", "a/b", "", "white space"] {
        let error = memory
            .load_session(dir.path(), id)
            .await
            .expect_err("id should be rejected");
        assert!(matches!(error, RagError::Config(_)));
    }
}
