use bson::{Bson, doc};

use docmodel_core::{
    error::DocumentStoreError,
    path::{
        collect_path_values, default_path_values, get_path_value, is_positional_segment, map_path_values,
        remove_path_value, set_path_value, to_dotted,
    },
};

fn trim(value: Bson) -> Result<Bson, DocumentStoreError> {
    Ok(match value {
        Bson::String(text) => Bson::String(text.trim().to_string()),
        other => other,
    })
}

#[test]
fn maps_every_array_item_and_skips_nulls() {
    let mut document = doc! { "tags": [" a ", Bson::Null, " b "] };

    map_path_values(&mut document, "tags[]", trim).unwrap();

    assert_eq!(document, doc! { "tags": ["a", Bson::Null, "b"] });
}

#[test]
fn maps_through_nested_arrays_of_documents() {
    let mut document = doc! {
        "items": [
            { "label": " first ", "qty": 1 },
            { "qty": 2 },
            { "label": " third " },
        ],
    };

    map_path_values(&mut document, "items[].label", trim).unwrap();

    assert_eq!(
        document,
        doc! {
            "items": [
                { "label": "first", "qty": 1 },
                { "qty": 2 },
                { "label": "third" },
            ],
        }
    );
}

#[test]
fn prefers_literal_dotted_keys_of_update_payloads() {
    let mut set = doc! { "profile.name": " Ada ", "profile": { "name": " untouched " } };

    map_path_values(&mut set, "profile.name", trim).unwrap();

    assert_eq!(set.get_str("profile.name").unwrap(), "Ada");
    assert_eq!(set.get_document("profile").unwrap().get_str("name").unwrap(), " untouched ");
}

#[test]
fn resolves_positional_update_keys() {
    let mut set = doc! {
        "items.1.label": " one ",
        "items.$.label": " current ",
        "items.$[].label": " all ",
        "other.1.label": " skipped ",
    };

    map_path_values(&mut set, "items[].label", trim).unwrap();

    assert_eq!(
        set,
        doc! {
            "items.1.label": "one",
            "items.$.label": "current",
            "items.$[].label": "all",
            "other.1.label": " skipped ",
        }
    );
}

#[test]
fn literal_positional_paths_touch_only_their_own_key() {
    let mut set = doc! { "items.0.label": "x", "items.1.label": " y " };

    map_path_values(&mut set, "items.1.label", trim).unwrap();

    assert_eq!(set, doc! { "items.0.label": "x", "items.1.label": "y" });
}

#[test]
fn positional_keys_need_three_components_in_key_form() {
    let mut short = doc! { "tags.0": " x " };
    let mut nested = doc! { "a.b.0": " x " };

    map_path_values(&mut short, "tags[]", trim).unwrap();
    map_path_values(&mut nested, "a.b[]", trim).unwrap();

    assert_eq!(short, doc! { "tags.0": " x " });
    assert_eq!(nested, doc! { "a.b.0": "x" });
}

#[test]
fn treats_push_payloads_as_array_items() {
    let mut single = doc! { "tags": " solo " };
    let mut each = doc! { "tags": { "$each": [" x ", " y "] } };

    map_path_values(&mut single, "tags[]", trim).unwrap();
    map_path_values(&mut each, "tags[]", trim).unwrap();

    assert_eq!(single, doc! { "tags": "solo" });
    assert_eq!(each, doc! { "tags": { "$each": ["x", "y"] } });
}

#[test]
fn addresses_tuple_positions() {
    let mut document = doc! { "pair": [" left ", " right "] };

    map_path_values(&mut document, "pair[1]", trim).unwrap();

    assert_eq!(document, doc! { "pair": [" left ", "right"] });
}

#[test]
fn fails_when_a_scalar_blocks_the_path() {
    let mut document = doc! { "profile": "not a document" };

    let error = map_path_values(&mut document, "profile.name", trim).unwrap_err();

    assert!(matches!(error, DocumentStoreError::Resolution { ref path, .. } if path == "profile.name"));
}

#[test]
fn transform_errors_abort_the_walk() {
    let mut document = doc! { "tags": ["ok", "bad", "never"] };
    let mut seen = Vec::new();

    let result = map_path_values(&mut document, "tags[]", |value| {
        seen.push(value.clone());

        match value.as_str() {
            Some("bad") => Err(DocumentStoreError::validation("tags[]", "bad tag")),
            _ => Ok(value),
        }
    });

    assert!(result.unwrap_err().is_validation());
    assert_eq!(seen.len(), 2);
}

#[test]
fn casting_round_trips_through_the_engine() {
    let mut document = doc! { "age": "42" };

    map_path_values(&mut document, "age", |value| match value {
        Bson::String(text) => text
            .parse::<i32>()
            .map(Bson::Int32)
            .map_err(|_| DocumentStoreError::validation("age", "not a number")),
        other => Ok(other),
    })
    .unwrap();
    assert_eq!(document.get("age"), Some(&Bson::Int32(42)));

    map_path_values(&mut document, "age", |value| Ok(Bson::String(value.to_string()))).unwrap();
    assert_eq!(document.get_str("age").unwrap(), "42");
}

#[test]
fn collects_values_including_nulls() {
    let document = doc! { "items": [{ "label": "a" }, { "label": Bson::Null }, {}] };

    assert_eq!(
        collect_path_values(&document, "items[].label").unwrap(),
        vec![Bson::String("a".into()), Bson::Null]
    );
}

#[test]
fn defaults_missing_values_and_creates_parents() {
    let mut document = doc! {};
    let mut calls = 0;

    default_path_values(&mut document, "createdAt", || {
        calls += 1;
        Bson::Int64(1)
    })
    .unwrap();
    default_path_values(&mut document, "profile.country", || Bson::String("NZ".into())).unwrap();
    default_path_values(&mut document, "tags[]", || Bson::String("unused".into())).unwrap();

    assert_eq!(calls, 1);
    assert_eq!(
        document,
        doc! { "createdAt": 1_i64, "profile": { "country": "NZ" }, "tags": [] }
    );
}

#[test]
fn defaults_inside_existing_arrays_only_where_missing() {
    let mut document = doc! { "items": [{ "label": "a" }, { "label": "b", "qty": 5 }], "slots": ["x", Bson::Null] };

    default_path_values(&mut document, "items[].qty", || Bson::Int32(1)).unwrap();
    default_path_values(&mut document, "slots[]", || Bson::String("empty".into())).unwrap();

    assert_eq!(
        document,
        doc! {
            "items": [{ "label": "a", "qty": 1 }, { "label": "b", "qty": 5 }],
            "slots": ["x", "empty"],
        }
    );
}

#[test]
fn leaves_present_values_alone() {
    let mut document = doc! { "status": "active" };

    default_path_values(&mut document, "status", || panic!("supplier must not run")).unwrap();

    assert_eq!(document, doc! { "status": "active" });
}

#[test]
fn dotted_get_set_and_remove() {
    let mut document = doc! { "tags": ["a"], "items": [{ "label": "x" }, { "label": "y" }] };

    assert_eq!(get_path_value(&document, "items.1.label"), Some(&Bson::String("y".into())));
    assert_eq!(get_path_value(&document, "items.5.label"), None);

    set_path_value(&mut document, "tags.2", Bson::String("c".into())).unwrap();
    set_path_value(&mut document, "profile.name", Bson::String("Ada".into())).unwrap();

    assert_eq!(document.get_array("tags").unwrap(), &vec![Bson::String("a".into()), Bson::Null, Bson::String("c".into())]);
    assert_eq!(get_path_value(&document, "profile.name"), Some(&Bson::String("Ada".into())));

    assert_eq!(remove_path_value(&mut document, "tags.0"), Some(Bson::String("a".into())));
    assert_eq!(remove_path_value(&mut document, "profile.name"), Some(Bson::String("Ada".into())));
    assert_eq!(document.get_array("tags").unwrap()[0], Bson::Null);
    assert!(set_path_value(&mut document, "tags.label", Bson::Null).is_err());
}

#[test]
fn converts_canonical_paths_to_dot_notation() {
    assert_eq!(to_dotted("items[].label"), "items.label");
    assert_eq!(to_dotted("pair[1]"), "pair.1");
    assert_eq!(to_dotted("matrix[][]"), "matrix");
    assert!(is_positional_segment("$[elem]"));
    assert!(is_positional_segment("12"));
    assert!(!is_positional_segment("label"));
}
