//! Chaining across scopes with two concrete families

mod common;

use common::{init_tracing, ms};
use convergent::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Todo {
    label: String,
    done: bool,
}

/// In-memory page holding a todo list
#[derive(Debug, Clone, Default)]
struct Page {
    todos: Arc<Mutex<Vec<Todo>>>,
}

impl Page {
    fn with(labels: &[&str]) -> Self {
        let page = Self::default();
        page.todos.lock().unwrap().extend(labels.iter().map(|label| Todo {
            label: (*label).to_string(),
            done: false,
        }));
        page
    }

    fn toggle(&self, index: usize) {
        let mut todos = self.todos.lock().unwrap();
        todos[index].done = !todos[index].done;
    }

    fn is_done(&self, index: usize) -> bool {
        self.todos.lock().unwrap()[index].done
    }

    fn toggle_after(&self, delay: std::time::Duration, index: usize) {
        let page = self.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            page.toggle(index);
        });
    }
}

impl ScopeResolver for Page {
    type Node = usize;

    fn resolve_one(&self, meta: &Meta) -> ConvergeResult<usize> {
        let label = meta
            .scope()
            .as_selector()
            .ok_or_else(|| ConvergeError::usage("todo items need a selector scope"))?;
        self.todos
            .lock()
            .unwrap()
            .iter()
            .position(|todo| todo.label == label)
            .ok_or_else(|| ConvergeError::failed("could not find {scope}"))
    }

    fn resolve_all(&self, _meta: &Meta) -> Vec<usize> {
        (0..self.todos.lock().unwrap().len()).collect()
    }
}

#[derive(Debug, Clone)]
struct TodoList {
    meta: Meta,
}

impl Interactor for TodoList {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn from_meta(meta: Meta) -> Self {
        Self { meta }
    }
}

impl TodoList {
    fn new() -> Self {
        Self::scoped("ul.todos").timeout(ms(200))
    }

    fn item(&self, label: &str) -> Scoped<Self, TodoItem> {
        self.nest(TodoItem::scoped(label))
    }

    fn assert_count(&self, page: &Page, expected: usize) -> Self {
        let page = page.clone();
        self.message("expected {scope} to hold a different number of todos")
            .when(move |ctx| page.resolve_all(ctx.owner()).len() == expected)
    }
}

#[derive(Debug, Clone)]
struct TodoItem {
    meta: Meta,
}

impl Interactor for TodoItem {
    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn from_meta(meta: Meta) -> Self {
        Self { meta }
    }
}

impl TodoItem {
    fn toggle(&self, page: &Page) -> Self {
        let page = page.clone();
        self.perform(move |ctx| {
            let index = page.resolve_one(ctx.owner())?;
            page.toggle(index);
            Ok::<_, ConvergeError>(json!(index))
        })
    }

    fn assert_done(&self, page: &Page) -> Self {
        let page = page.clone();
        self.message("expected {scope} {not}to be done")
            .when(move |ctx| page.resolve_one(ctx.owner()).map(|index| page.is_done(index)))
    }
}

mod type_preservation {
    use super::*;

    #[test]
    fn test_chain_returns_parent_family_with_one_step() {
        let page = Page::with(&["milk"]);
        let list = TodoList::new().assert_count(&page, 1);
        let next: TodoList = list.item("milk").chain(|item| item.toggle(&page));
        assert_eq!(next.meta().queue().len(), list.meta().queue().len() + 1);
        assert_eq!(list.meta().queue().len(), 1);
        assert!(next.meta().family().is::<TodoList>());
    }

    #[test]
    fn test_chained_step_owned_by_bound_child() {
        let page = Page::with(&["milk"]);
        let next = TodoList::new().item("milk").chain(|item| item.toggle(&page));
        let owner = next.meta().queue()[0].owner();
        assert!(owner.family().is::<TodoItem>());
        assert_eq!(owner.describe(), "\"milk\" within \"ul.todos\"");
    }

    #[test]
    fn test_chain_keeps_steps_queued_before_nesting() {
        let page = Page::with(&["milk"]);
        let prepared = TodoItem::scoped("milk").toggle(&page);
        let next = TodoList::new()
            .nest(prepared)
            .chain(|item| item.assert_done(&page));
        assert_eq!(next.meta().queue().len(), 2);
        assert_eq!(
            next.meta().queue()[0].owner().describe(),
            "\"milk\" within \"ul.todos\""
        );
    }

    #[test]
    fn test_unscoped_stays_in_child() {
        let page = Page::with(&["milk"]);
        let item: TodoItem = TodoList::new().item("milk").unscoped().toggle(&page);
        assert_eq!(item.meta().queue().len(), 1);
        assert_eq!(item.meta().describe(), "\"milk\"");
    }

    #[test]
    fn test_family_mismatch_is_usage_violation() {
        let list = TodoList::new();
        let err = TodoItem::try_from_meta(list.meta().clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UsageViolation);
    }
}

mod execution {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_toggle_then_assert_done() {
        init_tracing();
        let page = Page::with(&["milk", "bread"]);
        let value = TodoList::new()
            .assert_count(&page, 2)
            .item("bread")
            .chain(|item| item.toggle(&page))
            .item("bread")
            .chain(|item| item.assert_done(&page))
            .resolve()
            .await
            .unwrap();
        assert_eq!(value, json!(true));
        assert!(page.is_done(1));
        assert!(!page.is_done(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_app_to_catch_up() {
        let page = Page::with(&["milk"]);
        page.toggle_after(ms(40), 0);
        let start = Instant::now();
        let stats = TodoList::new()
            .item("milk")
            .chain(|item| item.assert_done(&page))
            .execute()
            .await
            .unwrap();
        assert!(start.elapsed() >= ms(40));
        assert!(start.elapsed() < ms(55));
        assert!(stats.sub_stats[0].runs >= 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negated_assertion() {
        let page = Page::with(&["milk"]);
        let result = TodoList::new()
            .item("milk")
            .chain(|item| item.not().assert_done(&page))
            .execute()
            .await;
        assert!(result.is_ok());

        page.toggle(0);
        let err = TodoList::new()
            .timeout(ms(30))
            .item("milk")
            .chain(|item| item.not().assert_done(&page))
            .execute()
            .await
            .unwrap_err();
        assert_eq!(
            err.cause().unwrap().to_string(),
            "expected \"milk\" within \"ul.todos\" not to be done"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_item_describes_ancestry() {
        let page = Page::with(&["milk"]);
        let err = TodoList::new()
            .item("eggs")
            .chain(|item| item.toggle(&page))
            .execute()
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
        assert_eq!(err.to_string(), "could not find \"eggs\" within \"ul.todos\"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_message_template() {
        let page = Page::with(&["milk"]);
        let err = TodoList::new()
            .timeout(ms(20))
            .assert_count(&page, 3)
            .execute()
            .await
            .unwrap_err();
        assert_eq!(
            err.cause().unwrap().to_string(),
            "expected \"ul.todos\" to hold a different number of todos"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepared_child_steps_run_after_chain() {
        let page = Page::with(&["milk"]);
        let prepared = TodoItem::scoped("milk").toggle(&page);
        let value = TodoList::new()
            .nest(prepared)
            .chain(|item| item.assert_done(&page))
            .resolve()
            .await
            .unwrap();
        assert_eq!(value, json!(true));
        assert!(page.is_done(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_queue_nested_from_callback() {
        let page = Page::with(&["milk"]);
        let toggle = TodoList::new().item("milk").unscoped().toggle(&page);
        let value = TodoList::new()
            .perform(move |_| Outcome::nested(&toggle))
            .item("milk")
            .chain(|item| item.assert_done(&page))
            .resolve()
            .await
            .unwrap();
        assert_eq!(value, json!(true));
    }
}
