//! Event application engine.
//!
//! Folds one [`ThingEvent`] onto the previous thing state. The same code
//! path serves live processing and recovery replay, so replaying the
//! journal from revision 0 reproduces exactly the state the live actor
//! held. Each event type owns one fold function; [`apply_event`] only
//! dispatches.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::Map;

use crate::event::{ThingEvent, ThingEventPayload, event_types};
use crate::model::{Lifecycle, Thing};

/// Fold of one event kind. Receives the previous state by value and
/// returns the next one; revision and timestamp are set by the caller.
type FoldFn = fn(&ThingEvent, Option<Thing>) -> Option<Thing>;

static FOLDS: LazyLock<HashMap<&'static str, FoldFn>> = LazyLock::new(|| {
    use event_types::*;

    let mut folds: HashMap<&'static str, FoldFn> = HashMap::new();
    folds.insert(THING_CREATED, thing_created);
    folds.insert(THING_MODIFIED, thing_modified);
    folds.insert(THING_DELETED, thing_deleted);
    folds.insert(ATTRIBUTES_CREATED, attributes_set);
    folds.insert(ATTRIBUTES_MODIFIED, attributes_set);
    folds.insert(ATTRIBUTES_DELETED, attributes_deleted);
    folds.insert(ATTRIBUTE_CREATED, attribute_set);
    folds.insert(ATTRIBUTE_MODIFIED, attribute_set);
    folds.insert(ATTRIBUTE_DELETED, attribute_deleted);
    folds.insert(FEATURES_CREATED, features_set);
    folds.insert(FEATURES_MODIFIED, features_set);
    folds.insert(FEATURES_DELETED, features_deleted);
    folds.insert(FEATURE_CREATED, feature_set);
    folds.insert(FEATURE_MODIFIED, feature_set);
    folds.insert(FEATURE_DELETED, feature_deleted);
    folds.insert(FEATURE_PROPERTY_CREATED, feature_property_set);
    folds.insert(FEATURE_PROPERTY_MODIFIED, feature_property_set);
    folds.insert(FEATURE_PROPERTY_DELETED, feature_property_deleted);
    folds
});

/// Apply `event` to `thing`, producing the state at `revision`.
///
/// # Arguments
///
/// * `event` - The event to fold.
/// * `thing` - State before the event; `None` if the thing never existed.
/// * `revision` - Revision of the resulting state, normally `event.revision`.
///
/// # Returns
///
/// The new state with `revision` set and `modified` taken from the event
/// timestamp. Events other than a creation leave an absent thing absent.
pub fn apply_event(event: &ThingEvent, thing: Option<Thing>, revision: u64) -> Option<Thing> {
    let Some(fold) = FOLDS.get(event.event_type()) else {
        tracing::warn!(event_type = event.event_type(), "no fold registered for event");
        return thing;
    };
    let mut next = fold(event, thing)?;
    next.revision = revision;
    if event.timestamp.is_some() {
        next.modified = event.timestamp;
    }
    Some(next)
}

fn thing_created(event: &ThingEvent, _thing: Option<Thing>) -> Option<Thing> {
    match &event.payload {
        ThingEventPayload::ThingCreated { thing } => {
            let mut created = thing.clone();
            if created.lifecycle.is_none() {
                created.lifecycle = Some(Lifecycle::Active);
            }
            Some(created)
        }
        _ => None,
    }
}

fn thing_modified(event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let current = thing?;
    match &event.payload {
        ThingEventPayload::ThingModified { thing: replacement } => {
            let mut modified = replacement.clone();
            if modified.lifecycle.is_none() {
                modified.lifecycle = current.lifecycle;
            }
            Some(modified)
        }
        _ => Some(current),
    }
}

fn thing_deleted(_event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    thing.lifecycle = Some(Lifecycle::Deleted);
    Some(thing)
}

fn attributes_set(event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    if let ThingEventPayload::AttributesCreated { attributes }
    | ThingEventPayload::AttributesModified { attributes } = &event.payload
    {
        thing.attributes = Some(attributes.clone());
    }
    Some(thing)
}

fn attributes_deleted(_event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    thing.attributes = None;
    Some(thing)
}

fn attribute_set(event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    if let ThingEventPayload::AttributeCreated { pointer, value }
    | ThingEventPayload::AttributeModified { pointer, value } = &event.payload
    {
        pointer.set(
            thing.attributes.get_or_insert_with(Map::new),
            value.clone(),
        );
    }
    Some(thing)
}

fn attribute_deleted(event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    if let ThingEventPayload::AttributeDeleted { pointer } = &event.payload
        && let Some(attributes) = thing.attributes.as_mut()
    {
        pointer.remove(attributes);
    }
    Some(thing)
}

fn features_set(event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    if let ThingEventPayload::FeaturesCreated { features }
    | ThingEventPayload::FeaturesModified { features } = &event.payload
    {
        thing.features = Some(features.clone());
    }
    Some(thing)
}

fn features_deleted(_event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    thing.features = None;
    Some(thing)
}

fn feature_set(event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    if let ThingEventPayload::FeatureCreated {
        feature_id,
        feature,
    }
    | ThingEventPayload::FeatureModified {
        feature_id,
        feature,
    } = &event.payload
    {
        thing
            .features
            .get_or_insert_with(Default::default)
            .insert(feature_id.clone(), feature.clone());
    }
    Some(thing)
}

fn feature_deleted(event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    if let ThingEventPayload::FeatureDeleted { feature_id } = &event.payload
        && let Some(features) = thing.features.as_mut()
    {
        features.remove(feature_id);
    }
    Some(thing)
}

fn feature_property_set(event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    if let ThingEventPayload::FeaturePropertyCreated {
        feature_id,
        pointer,
        value,
    }
    | ThingEventPayload::FeaturePropertyModified {
        feature_id,
        pointer,
        value,
    } = &event.payload
    {
        let feature = thing
            .features
            .get_or_insert_with(Default::default)
            .entry(feature_id.clone())
            .or_default();
        pointer.set(
            feature.properties.get_or_insert_with(Map::new),
            value.clone(),
        );
    }
    Some(thing)
}

fn feature_property_deleted(event: &ThingEvent, thing: Option<Thing>) -> Option<Thing> {
    let mut thing = thing?;
    if let ThingEventPayload::FeaturePropertyDeleted {
        feature_id,
        pointer,
    } = &event.payload
        && let Some(properties) = thing
            .features
            .as_mut()
            .and_then(|features| features.get_mut(feature_id))
            .and_then(|feature| feature.properties.as_mut())
    {
        pointer.remove(properties);
    }
    Some(thing)
}
