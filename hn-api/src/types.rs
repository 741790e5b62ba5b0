//! API Client types.
use log::error;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Hacker news item.
///
/// [`https://github.com/HackerNews/API`]
///
/// Every field other than the id is optional; deleted items carry little
/// more than their id and flags, and unknown `type` strings are preserved
/// verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Item {
    /// The item's unique id.
    pub id: u64,
    /// The type of item. One of "job", "story", "comment", "poll", or
    /// "pollopt"; anything else is stored as-is.
    #[serde(alias = "type", default)]
    pub ty: String,
    /// The username of the item's author.
    pub by: Option<String>,
    /// Creation date of the item, in Unix Time.
    #[serde(default)]
    pub time: u64,
    /// The comment, story or poll text. HTML.
    pub text: Option<String>,
    /// The title of the story, poll or job. HTML.
    pub title: Option<String>,
    /// The URL of the story.
    pub url: Option<String>,
    /// The story's score, or the votes for a pollopt.
    pub score: Option<i64>,
    /// The comment's parent: either another comment or the relevant story.
    pub parent: Option<u64>,
    /// The pollopt's associated poll.
    pub poll: Option<u64>,
    /// The ids of the item's comments, in ranked display order.
    #[serde(default)]
    pub kids: Vec<u64>,
    /// A list of related pollopts, in display order.
    #[serde(default)]
    pub parts: Vec<u64>,
    /// In the case of stories or polls, the total comment count.
    pub descendants: Option<u64>,
    /// true if the item is dead.
    #[serde(default)]
    pub dead: bool,
    /// true if the item is deleted.
    #[serde(default)]
    pub deleted: bool,
}

/// Hacker news user.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct User {
    pub id: String,
    pub about: Option<String>,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub karma: u64,
    #[serde(default)]
    pub submitted: Vec<u64>,
}

/// Payload of one event on the `updates` event-source channel.
#[derive(Deserialize, Debug)]
pub struct UpdatesEventData {
    pub path: String,
    pub data: Updates,
}

/// Changed item ids and user handles delivered by a live update.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct Updates {
    #[serde(default)]
    pub items: Vec<u64>,
    #[serde(default)]
    pub profiles: Vec<String>,
}

impl Updates {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.profiles.is_empty()
    }
}

/// Extension trait for the Result type to add logging capabilities.
pub trait ResultExt<T, E> {
    /// If the result is [`Err`] then log the error.
    fn log_error(self) -> Self;

    /// When you don't need the result but want to log failure.
    fn log_error_consume(self);
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: Display,
{
    fn log_error(self) -> Self {
        match self {
            o @ Ok(_) => o,
            Err(err) => {
                error!("{err}");
                Err(err)
            }
        }
    }

    fn log_error_consume(self) {
        let _ = self.log_error();
    }
}

#[cfg(test)]
mod tests {
    use super::{Item, Updates, UpdatesEventData};

    #[test]
    fn deserialize_story() {
        let json = r#"{
            "by": "dhouston",
            "descendants": 71,
            "id": 8863,
            "kids": [9224, 8917, 8952],
            "score": 104,
            "time": 1175714200,
            "title": "My YC app: Dropbox",
            "type": "story",
            "url": "http://www.getdropbox.com/u/2/screencast.html"
        }"#;

        let item: Item = serde_json::from_str(json).unwrap();

        assert_eq!(item.id, 8863);
        assert_eq!(item.ty, "story");
        assert_eq!(item.kids, vec![9224, 8917, 8952]);
        assert_eq!(item.score, Some(104));
        assert!(!item.deleted);
    }

    #[test]
    fn deserialize_deleted_item() {
        let json = r#"{"id": 1234, "deleted": true, "type": "comment", "time": 0}"#;

        let item: Item = serde_json::from_str(json).unwrap();

        assert!(item.deleted);
        assert!(item.by.is_none());
        assert!(item.kids.is_empty());
    }

    #[test]
    fn deserialize_updates_event() {
        let json = r#"{
            "path": "/v0/updates",
            "data": {"items": [500, 501], "profiles": ["alice", "bob"]}
        }"#;

        let event: UpdatesEventData = serde_json::from_str(json).unwrap();

        assert_eq!(event.data.items, vec![500, 501]);
        assert_eq!(event.data.profiles, vec!["alice", "bob"]);
    }

    #[test]
    fn empty_updates() {
        let updates = Updates::default();
        assert!(updates.is_empty());
    }
}
