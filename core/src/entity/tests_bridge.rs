use super::*;

#[test]
fn dimtag_round_trip_is_identity() {
    let ids = [
        EntityId::Vertex(1),
        EntityId::Curve(7),
        EntityId::Surface(3),
        EntityId::Volume(12),
    ];
    for id in ids {
        let dt = id.to_dimtag().unwrap();
        assert_eq!(ids_from_dimtags(&[dt]).unwrap(), vec![id]);
    }
}

#[test]
fn loop_ids_are_rejected_at_the_boundary() {
    assert_eq!(
        EntityId::CurveLoop(4).to_dimtag(),
        Err(EntityError::NotAKernelEntity(EntityId::CurveLoop(4)))
    );
    assert_eq!(
        EntityId::SurfaceLoop(1).to_dimtag(),
        Err(EntityError::NotAKernelEntity(EntityId::SurfaceLoop(1)))
    );
}

#[test]
fn conversion_orders_highest_dimension_first_and_dedups() {
    // Deliberately scrambled, with duplicates inside each dimension bucket.
    let pairs = vec![
        (0, 5),
        (2, 2),
        (1, 9),
        (3, 1),
        (2, 2),
        (0, 5),
        (1, 4),
        (3, 1),
        (0, 8),
    ];
    let ids = ids_from_dimtags(&pairs).unwrap();
    assert_eq!(
        ids,
        vec![
            EntityId::Volume(1),
            EntityId::Surface(2),
            EntityId::Curve(9),
            EntityId::Curve(4),
            EntityId::Vertex(5),
            EntityId::Vertex(8),
        ]
    );
}

#[test]
fn conversion_rejects_unknown_dimensions() {
    assert_eq!(
        ids_from_dimtags(&[(4, 1)]),
        Err(EntityError::UnknownDimension(4))
    );
}

#[test]
fn element_wise_dimtags_keep_order_and_duplicates() {
    let ids = [EntityId::Surface(2), EntityId::Vertex(1), EntityId::Surface(2)];
    assert_eq!(dimtags(&ids).unwrap(), vec![(2, 2), (0, 1), (2, 2)]);
}

#[test]
fn unique_counter_positions_are_one_based() {
    let mut counter = UniqueCounter::new();
    assert_eq!(counter.add_shape("a"), (true, 1));
    assert_eq!(counter.add_shape("a"), (false, 1));
    // The repeat above still occupies a slot, so the next fresh value
    // lands at position 3.
    assert_eq!(counter.add_shape("b"), (true, 3));
}

#[test]
fn unique_counter_matches_duplicate_free_enumerations() {
    let shapes = ["s1", "s2", "s3"];
    let mut before = UniqueCounter::new();
    let mut after = UniqueCounter::new();
    let first: Vec<usize> = shapes.iter().map(|s| before.add_shape(*s).1).collect();
    let second: Vec<usize> = shapes.iter().map(|s| after.add_shape(*s).1).collect();
    assert_eq!(first, second);
}

#[test]
fn polygon_stands_in_for_its_surface() {
    let poly = GeometryResult::Polygon {
        surface: EntityId::Surface(6),
        boundary: EntityId::CurveLoop(2),
        mesh_size: 0.1,
    };
    assert_eq!(poly.as_surface(), Some(EntityId::Surface(6)));
    assert_eq!(poly.entity_id(), EntityId::Surface(6));

    let vol = GeometryResult::Entity(EntityId::Volume(1));
    assert_eq!(vol.as_surface(), None);
}
