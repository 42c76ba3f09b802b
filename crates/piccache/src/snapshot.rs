//! Event payload normalization
//!
//! The server returns photos, detected people and the face detections that
//! link them. [`reshape`] turns that into the denormalized [`EventSnapshot`]
//! screens render and the cache stores.

use std::collections::{HashMap, HashSet};
use std::fmt;

use ahash::RandomState;
use serde::{Deserialize, Serialize};

use crate::entry::EventId;

/// A person must appear in at least this many photos to be shown in the
/// people strip.
pub const ESTABLISHED_PERSON_MIN_PHOTOS: usize = 3;

/// Server-side photo identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(pub u64);

/// Server-side identifier of a detected person
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub u64);

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event data as returned by the primary data source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEventPayload {
    /// Event the payload describes, if the server echoes it
    #[serde(default)]
    pub event_id: Option<EventId>,
    /// Photos, in server order
    #[serde(default, alias = "images")]
    pub photos: Vec<RawPhoto>,
    /// People detected in the event
    #[serde(default)]
    pub people: Vec<RawPerson>,
    /// Photo/person associations
    #[serde(default, alias = "faces")]
    pub detections: Vec<RawDetection>,
}

/// A photo in the raw payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPhoto {
    /// Photo id
    pub id: PhotoId,
    /// Viewable URL
    pub url: String,
}

/// A person in the raw payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPerson {
    /// Person id
    pub id: PersonId,
    /// Display name
    pub name: String,
}

/// A face detected in a photo. Unmatched faces carry no person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Photo the face was found in
    pub photo_id: PhotoId,
    /// Person the face was matched to
    #[serde(default, alias = "event_person_id")]
    pub person_id: Option<PersonId>,
}

/// Display-ready snapshot of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSnapshot {
    /// Event id
    pub id: EventId,
    /// Event name, as given by the caller
    pub name: String,
    /// Photos in server order, without duplicates
    pub images: Vec<EventImage>,
    /// Every person in the payload, including ones below the threshold
    pub people: Vec<PersonSummary>,
}

/// A photo in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventImage {
    /// Photo id
    pub id: PhotoId,
    /// Viewable URL
    pub url: String,
}

/// A person in a snapshot, with the photos they appear in resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonSummary {
    /// Person id
    pub id: PersonId,
    /// Display name
    pub name: String,
    /// URL of the first photo the person appears in
    pub thumbnail: Option<String>,
    /// Photos the person appears in, in image order
    pub photo_ids: Vec<PhotoId>,
}

impl PersonSummary {
    /// Number of distinct photos the person appears in
    pub fn photo_count(&self) -> usize {
        self.photo_ids.len()
    }

    /// Whether the person clears the people-strip threshold
    pub fn is_established(&self) -> bool {
        self.photo_count() >= ESTABLISHED_PERSON_MIN_PHOTOS
    }
}

impl EventSnapshot {
    /// People worth showing in the people strip
    pub fn people_strip(&self) -> Vec<&PersonSummary> {
        self.people.iter().filter(|p| p.is_established()).collect()
    }

    /// Look up a person by id
    pub fn person(&self, id: PersonId) -> Option<&PersonSummary> {
        self.people.iter().find(|p| p.id == id)
    }

    /// Gallery of a person, in image order. Empty for unknown people.
    pub fn photos_of(&self, id: PersonId) -> Vec<&EventImage> {
        let Some(person) = self.person(id) else {
            return Vec::new();
        };
        let wanted: HashSet<PhotoId, RandomState> = person.photo_ids.iter().copied().collect();

        self.images
            .iter()
            .filter(|image| wanted.contains(&image.id))
            .collect()
    }
}

/// Per-fetch lookup entry; never persisted
struct PhotoLookup<'a> {
    url: &'a str,
    person_ids: Vec<PersonId>,
}

/// Build the display-ready snapshot for an event.
///
/// Duplicate photos and people keep their first occurrence. Detections that
/// point at unknown photos, or carry no person, are ignored. A person who
/// shows up several times in one photo counts that photo once.
pub fn reshape(event_id: EventId, event_name: &str, payload: &RawEventPayload) -> EventSnapshot {
    let mut lookup: HashMap<PhotoId, PhotoLookup<'_>, RandomState> =
        HashMap::with_capacity_and_hasher(payload.photos.len(), RandomState::new());
    let mut images = Vec::with_capacity(payload.photos.len());

    for photo in &payload.photos {
        if lookup.contains_key(&photo.id) {
            continue;
        }
        lookup.insert(
            photo.id,
            PhotoLookup {
                url: &photo.url,
                person_ids: Vec::new(),
            },
        );
        images.push(EventImage {
            id: photo.id,
            url: photo.url.clone(),
        });
    }

    for detection in &payload.detections {
        let Some(person_id) = detection.person_id else {
            continue;
        };
        if let Some(entry) = lookup.get_mut(&detection.photo_id) {
            if !entry.person_ids.contains(&person_id) {
                entry.person_ids.push(person_id);
            }
        }
    }

    let mut appearances: HashMap<PersonId, Vec<PhotoId>, RandomState> = HashMap::default();
    for image in &images {
        if let Some(entry) = lookup.get(&image.id) {
            for person_id in &entry.person_ids {
                appearances.entry(*person_id).or_default().push(image.id);
            }
        }
    }

    let mut seen: HashSet<PersonId, RandomState> = HashSet::default();
    let people = payload
        .people
        .iter()
        .filter(|person| seen.insert(person.id))
        .map(|person| {
            let photo_ids = appearances.remove(&person.id).unwrap_or_default();
            let thumbnail = photo_ids
                .first()
                .and_then(|id| lookup.get(id))
                .map(|entry| entry.url.to_string());

            PersonSummary {
                id: person.id,
                name: person.name.clone(),
                thumbnail,
                photo_ids,
            }
        })
        .collect();

    EventSnapshot {
        id: event_id,
        name: event_name.to_string(),
        images,
        people,
    }
}
