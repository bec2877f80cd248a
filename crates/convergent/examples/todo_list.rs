//! Example: Todo List Convergence
//!
//! Demonstrates: immutable instances, chaining into a child scope, waiting
//! for an app that updates asynchronously, and "stays true" assertions.
//!
//! Run with: `RUST_LOG=convergent=debug cargo run --example todo_list`

use convergent::prelude::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Fake page: a list of (label, done) pairs updated by a background "app"
#[derive(Debug, Clone, Default)]
struct Page {
    todos: Arc<Mutex<Vec<(String, bool)>>>,
}

impl Page {
    fn add(&self, label: &str) {
        if let Ok(mut todos) = self.todos.lock() {
            todos.push((label.to_string(), false));
        }
    }

    fn set_done(&self, index: usize, done: bool) {
        if let Ok(mut todos) = self.todos.lock() {
            if let Some(todo) = todos.get_mut(index) {
                todo.1 = done;
            }
        }
    }

    fn is_done(&self, index: usize) -> bool {
        self.todos
            .lock()
            .map(|todos| todos.get(index).is_some_and(|todo| todo.1))
            .unwrap_or(false)
    }
}

impl ScopeResolver for Page {
    type Node = usize;

    fn resolve_one(&self, meta: &Meta) -> ConvergeResult<usize> {
        let label = meta.scope().as_selector().unwrap_or_default();
        self.todos
            .lock()
            .map_err(|_| ConvergeError::failed("page lock poisoned"))?
            .iter()
            .position(|(todo, _)| todo == label)
            .ok_or_else(|| ConvergeError::failed("could not find {scope}"))
    }

    fn resolve_all(&self, _meta: &Meta) -> Vec<usize> {
        self.todos
            .lock()
            .map(|todos| (0..todos.len()).collect())
            .unwrap_or_default()
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
    fn item(&self, label: &str) -> Scoped<Self, TodoItem> {
        self.nest(TodoItem::scoped(label))
    }

    fn has_items(&self, page: &Page, count: usize) -> Self {
        let page = page.clone();
        self.when(move |ctx| page.resolve_all(ctx.owner()).len() == count)
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
    fn is_done(&self, page: &Page) -> Self {
        let page = page.clone();
        self.message("expected {scope} {not}to be done")
            .when(move |ctx| page.resolve_one(ctx.owner()).map(|index| page.is_done(index)))
    }

    fn stays_done(&self, page: &Page, window: Duration) -> Self {
        let page = page.clone();
        self.message("expected {scope} to stay done")
            .always_for(window, move |ctx| {
                page.resolve_one(ctx.owner()).map(|index| page.is_done(index))
            })
    }
}

#[tokio::main]
async fn main() -> ConvergeResult<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    println!("=== Todo List Convergence Example ===\n");

    let page = Page::default();
    page.add("milk");
    page.add("bread");

    // The "app" finishes the second todo a little later
    let app = page.clone();
    let _ = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(120)).await;
        app.set_done(1, true);
    });

    let list = TodoList::scoped("ul.todos").timeout(Duration::from_millis(1000));

    // 1. Builders never mutate: `list` still has an empty queue
    let checks = list
        .has_items(&page, 2)
        .item("bread")
        .chain(|item| item.is_done(&page))
        .item("bread")
        .chain(|item| item.stays_done(&page, Duration::from_millis(50)));
    println!(
        "1. Built {} steps; original list still has {}",
        checks.meta().queue().len(),
        list.meta().queue().len()
    );

    // 2. Execute and inspect the stats
    let stats = checks.execute().await?;
    println!(
        "2. Converged in {}ms over {} run(s)",
        stats.elapsed_ms(),
        stats.total_runs()
    );

    // 3. A failing check names the scope and its ancestry
    let missing = list
        .timeout(Duration::from_millis(100))
        .item("eggs")
        .chain(|item| item.is_done(&page));
    match missing.execute().await {
        Ok(_) => println!("3. Unexpectedly found eggs"),
        Err(e) => println!("3. Failed as expected: {e}"),
    }

    // 4. Catch steps can turn failures into values
    let recovered = list
        .timeout(Duration::from_millis(50))
        .item("milk")
        .chain(|item| item.is_done(&page))
        .catch(|_, err| json!({ "recovered": err.kind() }))
        .execute()
        .await?;
    println!("4. Recovered with {}", recovered.value);

    println!("\n=== Example Complete ===");
    Ok(())
}
