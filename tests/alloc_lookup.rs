use std::alloc::System;
use std::sync::Arc;

use stats_alloc::{Region, StatsAlloc, INSTRUMENTED_SYSTEM};

use kyro_import::{BadCollector, CollectorConfig, ExternalId, Group, Groups, IdMapper, IdType, NumberArrayFactory};

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;

fn prepared_mapper(id_type: IdType, keys: &[ExternalId]) -> IdMapper {
    let factory = NumberArrayFactory::default();
    let mut mapper = IdMapper::for_id_type(id_type, &factory, Arc::new(Groups::new()), 1 << 20, 2);
    let group = Group::global();
    for (i, key) in keys.iter().enumerate() {
        mapper.put(&group, key, i as u64).unwrap();
    }
    let collector = BadCollector::new(CollectorConfig::default()).unwrap();
    mapper.prepare(&collector).unwrap();
    collector.close().unwrap();
    mapper
}

// One test per binary: the allocator counters are process-wide.
#[test]
fn lookups_do_not_allocate() {
    let group = Group::global();

    let strings: Vec<ExternalId> = (0..10_000).map(|i| ExternalId::from(format!("user-{i}"))).collect();
    let string_mapper = prepared_mapper(IdType::String, &strings);
    let missing = ExternalId::from("nobody");

    let integers: Vec<ExternalId> = (0..10_000i64).map(|i| ExternalId::Int(i * 1_000_003)).collect();
    let integer_mapper = prepared_mapper(IdType::Integer, &integers);

    let region = Region::new(GLOBAL);
    for (i, key) in strings.iter().enumerate().step_by(97) {
        assert_eq!(string_mapper.get(&group, key).unwrap(), Some(i as u64));
    }
    assert_eq!(string_mapper.get(&group, &missing).unwrap(), None);
    let stats = region.change();
    assert_eq!(stats.allocations, 0, "string lookups allocated: {stats:?}");

    let region = Region::new(GLOBAL);
    for (i, key) in integers.iter().enumerate().step_by(101) {
        assert_eq!(integer_mapper.get(&group, key).unwrap(), Some(i as u64));
    }
    let stats = region.change();
    assert_eq!(stats.allocations, 0, "integer lookups allocated: {stats:?}");
}
