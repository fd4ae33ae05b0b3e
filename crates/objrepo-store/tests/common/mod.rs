#![allow(dead_code)]

use std::sync::Arc;

use objrepo_core::{
    Entity, ForeignKey, Model, ModelBase, ObjectRepository, Reference, RepositoryOptions, Result,
    Storage,
};
use objrepo_store::MemoryStorage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorRecord {
    pub id: Uuid,
    pub name: String,
}

impl Entity for AuthorRecord {
    const KIND: &'static str = "authors";
    fn id(&self) -> Uuid {
        self.id
    }
}

pub struct Author {
    base: ModelBase<AuthorRecord>,
}

impl Author {
    pub fn new(name: &str) -> Self {
        Self::from_record(AuthorRecord {
            id: Uuid::now_v7(),
            name: name.to_string(),
        })
    }

    pub fn from_record(record: AuthorRecord) -> Self {
        Self {
            base: ModelBase::new(record),
        }
    }

    pub fn name(&self) -> String {
        self.base.read(|r| r.name.clone())
    }

    pub fn set_name(&self, name: &str) -> Result<bool> {
        self.base.update("name", |r| &mut r.name, name.to_string())
    }

    pub fn books(&self) -> Result<Vec<Arc<Book>>> {
        self.multiple(&Book::AUTHOR)
    }
}

impl Model for Author {
    type Record = AuthorRecord;
    fn base(&self) -> &ModelBase<AuthorRecord> {
        &self.base
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: Uuid,
    pub author_id: Option<Uuid>,
    pub title: String,
}

impl Entity for BookRecord {
    const KIND: &'static str = "books";
    fn id(&self) -> Uuid {
        self.id
    }
}

pub struct Book {
    base: ModelBase<BookRecord>,
}

impl Book {
    pub const AUTHOR: ForeignKey<Book, Author> = ForeignKey::nullable(
        "author_id",
        |b: &Book| b.author_id(),
        |b: &Book| b.set_author_id(None),
    );

    pub fn new(author: &Author, title: &str) -> Self {
        Self::from_record(BookRecord {
            id: Uuid::now_v7(),
            author_id: Some(author.id()),
            title: title.to_string(),
        })
    }

    pub fn from_record(record: BookRecord) -> Self {
        Self {
            base: ModelBase::new(record),
        }
    }

    pub fn title(&self) -> String {
        self.base.read(|r| r.title.clone())
    }

    pub fn set_title(&self, title: &str) -> Result<bool> {
        self.base.update("title", |r| &mut r.title, title.to_string())
    }

    pub fn author_id(&self) -> Option<Uuid> {
        self.base.read(|r| r.author_id)
    }

    pub fn set_author_id(&self, author_id: Option<Uuid>) -> Result<bool> {
        self.base.update("author_id", |r| &mut r.author_id, author_id)
    }

    pub fn author(&self) -> Result<Option<Arc<Author>>> {
        self.single(self.author_id(), "author")
    }
}

impl Model for Book {
    type Record = BookRecord;
    fn base(&self) -> &ModelBase<BookRecord> {
        &self.base
    }

    fn foreign_keys() -> Vec<Reference<Self>> {
        vec![Book::AUTHOR.reference()]
    }
}

/// An initialized repository over `storage` with both library types
pub async fn open_library(storage: &MemoryStorage, options: RepositoryOptions) -> ObjectRepository {
    let backend: Arc<dyn Storage> = Arc::new(storage.clone());
    let repo = ObjectRepository::new(backend, options).unwrap();
    repo.register_type::<Author, _>(Author::from_record).unwrap();
    repo.register_type::<Book, _>(Book::from_record).unwrap();
    repo.initialize().await.unwrap();
    repo
}

pub fn decode<E: Entity>(value: serde_json::Value) -> E {
    serde_json::from_value(value).unwrap()
}
