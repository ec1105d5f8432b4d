use std::sync::{Arc, Mutex};

use kyro_import::{
    BadCollector, BadEntry, CollectorConfig, DataInput, Discard, ExternalId, Group, ImportConfig, ImportResult,
    Importer, Input, InputNode, InputRelationship, ResolvedRelationship, Side, Tolerance, VecSource,
};

fn config() -> ImportConfig {
    ImportConfig {
        workers: 4,
        batch_size: 3,
        collector: CollectorConfig {
            tolerance: Tolerance::Unbounded,
            ..CollectorConfig::default()
        },
        ..ImportConfig::default()
    }
}

#[test]
fn duplicate_keeps_first_occurrence() {
    let config = config();
    let nodes = ["a", "b", "a", "c"].into_iter().map(InputNode::new).collect();
    let input = DataInput::new(VecSource::new(nodes), VecSource::<InputRelationship>::new(Vec::new()), config.clone()).unwrap();

    let factory = kyro_import::NumberArrayFactory::default();
    let generator = input.id_generator();
    let mut mapper = input.id_mapper(&factory);
    let group = Group::global();
    for key in ["a", "b", "a", "c"] {
        let external = ExternalId::from(key);
        let id = generator.next(Some(&external)).unwrap();
        mapper.put(&group, &external, id).unwrap();
    }
    assert_eq!(generator.highest_id(), 4);

    let collector = input.bad_collector();
    mapper.prepare(&collector).unwrap();

    assert_eq!(mapper.get(&group, &ExternalId::from("a")).unwrap(), Some(0));
    assert_eq!(mapper.get(&group, &ExternalId::from("b")).unwrap(), Some(1));
    assert_eq!(mapper.get(&group, &ExternalId::from("c")).unwrap(), Some(3));

    let entries = collector.entries();
    assert_eq!(entries.len(), 1);
    let BadEntry::DuplicateNode { id, canonical, duplicate, .. } = &entries[0] else {
        panic!("expected a duplicate, got {:?}", entries[0]);
    };
    assert_eq!(id, &ExternalId::from("a"));
    assert_eq!((*canonical, *duplicate), (0, 2));
}

#[test]
fn duplicate_report_points_at_the_dropped_record() {
    let config = config();
    let report = tempfile::NamedTempFile::new().unwrap();
    let collector = Arc::new(
        BadCollector::with_report(config.collector.clone(), Box::new(report.reopen().unwrap())).unwrap(),
    );
    let records = vec![
        InputNode::new("a"),
        InputNode::anonymous(),
        InputNode::new("b"),
        InputNode::anonymous(),
        InputNode::new("a").with_property("name", "second"),
    ];
    let input = DataInput::with_collector(
        VecSource::new(records.clone()),
        VecSource::<InputRelationship>::new(Vec::new()),
        config.clone(),
        Arc::clone(&collector),
    );

    let seen = Mutex::new(Vec::new());
    let nodes = |id: u64, node: &InputNode| -> ImportResult<()> {
        seen.lock().unwrap().push((id, node.clone()));
        Ok(())
    };
    let summary = Importer::new(&config).unwrap().run(&input, &nodes, &Discard).unwrap();
    assert_eq!(summary.duplicates, 1);

    let entries = collector.entries();
    let [BadEntry::DuplicateNode { id, canonical, duplicate, .. }] = entries.as_slice() else {
        panic!("expected one duplicate, got {entries:?}");
    };
    assert_eq!(id, &ExternalId::from("a"));
    assert_eq!((*canonical, *duplicate), (0, 4));

    // The reported id locates the dropped record in the input.
    let dropped = usize::try_from(*duplicate).unwrap();
    assert_eq!(records[dropped].properties, vec![("name".to_string(), kyro_import::Value::from("second"))]);
    let mut seen = seen.into_inner().unwrap();
    seen.sort_by_key(|(id, _)| *id);
    assert_eq!(seen[dropped].1, records[dropped]);

    let text = std::fs::read_to_string(report.path()).unwrap();
    assert!(text.contains("dropped node 4 at node position 4"));
}

#[test]
fn missing_start_node_is_reported_and_dropped() {
    let config = config();
    let report = tempfile::NamedTempFile::new().unwrap();
    let collector = Arc::new(
        BadCollector::with_report(config.collector.clone(), Box::new(report.reopen().unwrap())).unwrap(),
    );
    let input = DataInput::with_collector(
        VecSource::new(vec![InputNode::new("a"), InputNode::new("b")]),
        VecSource::new(vec![
            InputRelationship::new("a", "KNOWS", "b"),
            InputRelationship::new("z", "KNOWS", "b"),
        ]),
        config.clone(),
        Arc::clone(&collector),
    );

    let resolved = Mutex::new(Vec::new());
    let sink = |rel: ResolvedRelationship| -> ImportResult<()> {
        resolved.lock().unwrap().push(rel);
        Ok(())
    };
    let summary = Importer::new(&config).unwrap().run(&input, &Discard, &sink).unwrap();

    assert_eq!(summary.unresolved, 1);
    assert_eq!(summary.resolved_relationships, 1);
    let resolved = resolved.into_inner().unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!((resolved[0].start, resolved[0].end), (0, 1));

    let entries = collector.entries();
    let [BadEntry::UnresolvedEndpoint { position, side, relationship }] = entries.as_slice() else {
        panic!("expected one unresolved endpoint, got {entries:?}");
    };
    assert_eq!(*position, 1);
    assert_eq!(*side, Side::Start);
    assert_eq!(relationship.start, ExternalId::from("z"));

    let text = std::fs::read_to_string(report.path()).unwrap();
    assert!(text.starts_with("# kyro-import bad entries"));
    assert!(text.contains("missing start node 'z'"));
}

#[test]
fn both_sides_missing() {
    let config = config();
    let input = DataInput::new(
        VecSource::new(vec![InputNode::new("a")]),
        VecSource::new(vec![InputRelationship::new("x", "R", "y")]),
        config.clone(),
    )
    .unwrap();
    let summary = Importer::new(&config).unwrap().run(&input, &Discard, &Discard).unwrap();
    assert_eq!(summary.unresolved, 1);
    assert!(matches!(
        input.bad_collector().entries().as_slice(),
        [BadEntry::UnresolvedEndpoint { side: Side::Both, .. }]
    ));
}

#[test]
fn groups_keep_equal_ids_apart() {
    let config = config();
    let input = DataInput::new(
        VecSource::<InputNode>::new(Vec::new()),
        VecSource::<InputRelationship>::new(Vec::new()),
        config.clone(),
    )
    .unwrap();
    let users = input.groups().get_or_create("users").unwrap();
    let orders = input.groups().get_or_create("orders").unwrap();

    let nodes = vec![
        InputNode::new("1").in_group(users.clone()),
        InputNode::new("1").in_group(orders.clone()),
    ];
    let rels = vec![InputRelationship::new("1", "PLACED", "1").with_groups(users, orders)];
    let input = DataInput::new(VecSource::new(nodes), VecSource::new(rels), config.clone())
        .unwrap()
        .with_groups(Arc::clone(input.groups()));

    let resolved = Mutex::new(Vec::new());
    let sink = |rel: ResolvedRelationship| -> ImportResult<()> {
        resolved.lock().unwrap().push((rel.start, rel.end));
        Ok(())
    };
    let summary = Importer::new(&config).unwrap().run(&input, &Discard, &sink).unwrap();

    assert_eq!(summary.duplicates, 0);
    assert_eq!(resolved.into_inner().unwrap(), vec![(0, 1)]);
}

#[test]
fn estimates_do_not_touch_the_mapper() {
    let config = config();
    let input = DataInput::new(
        VecSource::new(vec![
            InputNode::new("a").with_label("Person").with_property("name", "Ada"),
            InputNode::new("b"),
        ]),
        VecSource::new(vec![InputRelationship::new("a", "KNOWS", "b").with_property("w", 1i64)]),
        config.clone(),
    )
    .unwrap();

    let estimates = input.calculate_estimates(&|values: &[kyro_import::Value]| values.len() as u64).unwrap();
    assert_eq!(estimates.number_of_nodes, 2);
    assert_eq!(estimates.number_of_relationship_properties, 1);
    assert_eq!(estimates.size_of_node_properties, 1);

    // The sources can still be imported afterwards.
    let summary = Importer::new(&config).unwrap().run(&input, &Discard, &Discard).unwrap();
    assert_eq!(summary.nodes, 2);
    assert_eq!(summary.unresolved, 0);
}
