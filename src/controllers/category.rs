// Demo controller backing the `category` routes with an in-memory store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use http::Method;
use serde::Serialize;

use crate::constraints::{Constraint, FieldRule};
use crate::error::{PipelineError, PipelineResult};
use crate::registry::{ControllerPaths, ControllerRegistry, RegistryError, RouteDescriptor};
use crate::request::{Request, Response, SortDirection};
use crate::security::Role;

pub const NAME: &str = "category";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub id: u64,
    pub name: String,
}

/// Concurrent category table.
#[derive(Debug)]
pub struct CategoryStore {
    rows: DashMap<u64, Category>,
    next_id: AtomicU64,
}

impl Default for CategoryStore {
    fn default() -> Self {
        Self {
            rows: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl CategoryStore {
    #[must_use]
    pub fn seeded() -> Self {
        let store = Self::default();
        for name in ["Books", "Games", "Music"] {
            store.insert(name);
        }
        store
    }

    pub fn insert(&self, name: &str) -> Category {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let category = Category {
            id,
            name: name.to_string(),
        };
        self.rows.insert(id, category.clone());
        category
    }

    #[must_use]
    pub fn get(&self, id: u64) -> Option<Category> {
        self.rows.get(&id).map(|row| row.value().clone())
    }

    /// Rows whose name contains `search` (case-insensitive), sorted.
    #[must_use]
    pub fn list(&self, search: Option<&str>, sort_by_name: bool, direction: SortDirection) -> Vec<Category> {
        let needle = search.map(str::to_lowercase);
        let mut rows: Vec<Category> = self
            .rows
            .iter()
            .map(|row| row.value().clone())
            .filter(|c| {
                needle
                    .as_deref()
                    .map_or(true, |n| c.name.to_lowercase().contains(n))
            })
            .collect();
        if sort_by_name {
            rows.sort_by(|a, b| a.name.cmp(&b.name));
        } else {
            rows.sort_by_key(|c| c.id);
        }
        if direction == SortDirection::Desc {
            rows.reverse();
        }
        rows
    }

    pub fn rename(&self, id: u64, name: &str) -> Option<Category> {
        let mut row = self.rows.get_mut(&id)?;
        row.name = name.to_string();
        Some(row.clone())
    }

    pub fn remove(&self, id: u64) -> Option<Category> {
        self.rows.remove(&id).map(|(_, c)| c)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn id_rule() -> FieldRule {
    FieldRule::new("id").with(Constraint::min(1, "ID must be greater than or equal to {0}"))
}

fn require_id(req: &Request) -> PipelineResult<u64> {
    req.id()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| PipelineError::handler(400, "A valid category id is required"))
}

fn not_found(id: u64) -> PipelineError {
    PipelineError::handler(404, format!("Category {id} not found"))
}

/// Build the `category` controller over `store`.
///
/// # Errors
///
/// Only on a duplicate action key.
pub fn controller(store: Arc<CategoryStore>) -> Result<ControllerRegistry, RegistryError> {
    let paths = ControllerPaths::new(NAME);
    let p = paths.clone();
    let new = RouteDescriptor::new("/new", move |_| {
        Ok(Response::new(200).with_next(p.forward_to("formCreateCategory")))
    });

    let (s, p) = (Arc::clone(&store), paths.clone());
    let list = RouteDescriptor::new("/list", move |req| {
        let page = &req.query.page_request;
        let rows = s.list(
            req.query.search.as_deref(),
            page.sort.field == "name",
            page.sort.direction,
        );
        Response::new(200)
            .with_json(&rows)
            .map(|r| r.with_next(p.forward_to("listCategories")))
    });

    let (s, p) = (Arc::clone(&store), paths.clone());
    let list_by_id = RouteDescriptor::new("/list/{id}", move |req| {
        let id = require_id(req)?;
        let category = s.get(id).ok_or_else(|| not_found(id))?;
        Response::new(200)
            .with_json(&category)
            .map(|r| r.with_next(p.forward_to("formListCategory")))
    })
    .field(id_rule());

    let (s, p) = (Arc::clone(&store), paths.clone());
    let edit = RouteDescriptor::new("/edit/{id}", move |req| {
        let id = require_id(req)?;
        let category = s.get(id).ok_or_else(|| not_found(id))?;
        Response::new(200)
            .with_json(&category)
            .map(|r| r.with_next(p.forward_to("formUpdateCategory")))
    })
    .field(id_rule());

    let (s, p) = (Arc::clone(&store), paths.clone());
    let create = RouteDescriptor::new("/create", move |req| {
        let name = req.parameter("name").unwrap_or_default();
        let category = s.insert(name);
        Ok(Response::with_status(201, p.redirect_to_id(&category.id.to_string())))
    })
    .method(Method::POST)
    .field(FieldRule::new("name").with_all(Constraint::length_between(
        3,
        50,
        "Name must be between {0} and {1} characters",
    )));

    let (s, p) = (Arc::clone(&store), paths.clone());
    let update = RouteDescriptor::new("/update/{id}", move |req| {
        let id = require_id(req)?;
        let name = req.parameter("name").unwrap_or_default();
        let category = s.rename(id, name).ok_or_else(|| not_found(id))?;
        Ok(Response::with_status(204, p.redirect_to_id(&category.id.to_string())))
    })
    .method(Method::POST)
    .field(id_rule())
    .field(
        FieldRule::new("name")
            .with(Constraint::min_length(5, "Name must be at least {0} characters"))
            .with(Constraint::max_length(50, "Name must be at most {1} characters")),
    );

    let (s, p) = (Arc::clone(&store), paths);
    let delete = RouteDescriptor::new("/delete/{id}", move |req| {
        let id = require_id(req)?;
        s.remove(id).ok_or_else(|| not_found(id))?;
        Ok(Response::with_status(200, p.redirect_to("list")))
    })
    .method(Method::POST)
    .roles([Role::Admin])
    .field(id_rule());

    ControllerRegistry::builder(NAME)
        .route(new)
        .route(list)
        .route(list_by_id)
        .route(edit)
        .route(create)
        .route(update)
        .route(delete)
        .build()
}
