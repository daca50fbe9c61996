use acq_core::config::TilingConfig;
use acq_core::error::AcqError;
use acq_experiment::{expand, AcquisitionSettings, Channel, FootprintSource, SpaceMode, TimeSpec, TimeUnit};
use acq_geometry::{Footprint, GeometryProvider, InterpolationMethod, Point2, Point3, Region, SurfaceId};

fn provider() -> GeometryProvider {
    GeometryProvider::new(TilingConfig::default())
}

/// Four corners of a 1000 x 500 rectangle, two tiles wide at 500 µm.
fn rectangle(geo: &GeometryProvider, name: &str, left_z: f64, right_z: f64) -> SurfaceId {
    let id = geo.add_surface(name);
    geo.set_method(id, InterpolationMethod::NearestNeighbor).unwrap();
    for (x, y, z) in [
        (0.0, 0.0, left_z),
        (0.0, 500.0, left_z),
        (1000.0, 0.0, right_z),
        (1000.0, 500.0, right_z),
    ] {
        geo.add_point(id, Point3::new(x, y, z)).unwrap();
    }
    id
}

#[test]
fn six_event_end_to_end_order() {
    let geo = provider();
    let region = geo.add_region(Region::new("single", Point2::new(0.0, 0.0), 1, 1));
    let settings = AcquisitionSettings::new("stack")
        .with_time(TimeSpec::points(2, 0.0, TimeUnit::Seconds))
        .with_space(SpaceMode::SimpleZStack {
            footprint: Footprint::Region(region),
            z_start: 0.0,
            z_end: 2.0,
            z_step: 1.0,
        });

    let expanded = expand(&settings, &geo).unwrap();
    let order: Vec<(usize, usize, Option<f64>)> = expanded
        .events()
        .iter()
        .map(|e| (e.time_index, e.position_index, e.z))
        .collect();
    assert_eq!(
        order,
        vec![
            (0, 0, Some(0.0)),
            (0, 0, Some(1.0)),
            (0, 0, Some(2.0)),
            (1, 0, Some(0.0)),
            (1, 0, Some(1.0)),
            (1, 0, Some(2.0)),
        ]
    );
    assert!(expanded.events().iter().all(|e| e.channel == "Default"));
    assert_eq!(expanded.time_point(1).len(), 3);
    assert!(expanded.time_point(2).is_empty());
}

#[test]
fn expansion_is_idempotent() {
    let geo = provider();
    let region = geo.add_region(Region::new("grid", Point2::new(100.0, -50.0), 3, 2));
    let settings = AcquisitionSettings::new("idem")
        .with_time(TimeSpec::points(2, 1.0, TimeUnit::Minutes))
        .with_space(SpaceMode::SimpleZStack {
            footprint: Footprint::Region(region),
            z_start: -3.0,
            z_end: 3.0,
            z_step: 0.5,
        })
        .with_overlap(10.0)
        .with_channel(Channel::new("DAPI"))
        .with_channel(Channel::new("GFP"));

    let first = expand(&settings, &geo).unwrap();
    let second = expand(&settings, &geo).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2 * 6 * 13 * 2);
}

#[test]
fn channels_are_innermost() {
    let geo = provider();
    let region = geo.add_region(Region::new("pair", Point2::new(0.0, 0.0), 1, 2));
    let settings = AcquisitionSettings::new("order")
        .with_space(SpaceMode::Region2D {
            footprint: Footprint::Region(region),
        })
        .with_channel(Channel::new("A"))
        .with_channel(Channel::new("B"));
    let expanded = expand(&settings, &geo).unwrap();
    let order: Vec<(usize, &str)> = expanded
        .events()
        .iter()
        .map(|e| (e.position_index, e.channel.as_str()))
        .collect();
    assert_eq!(order, vec![(0, "A"), (0, "B"), (1, "A"), (1, "B")]);
    assert_eq!(expanded.events()[0].position, Some((-250.0, 0.0)));
    assert_eq!(expanded.events()[0].z, None);
}

#[test]
fn volume_between_surfaces_boundary() {
    let geo = provider();
    // Top is 10 µm above bottom on the left tile and 100 µm on the right.
    let top = rectangle(&geo, "top", 10.0, 100.0);
    let bottom = rectangle(&geo, "bottom", 0.0, 0.0);

    let settings = AcquisitionSettings::new("volume").with_space(SpaceMode::VolumeBetweenSurfaces {
        top,
        bottom,
        distance_above_top: 0.0,
        distance_below_bottom: 20.0,
        footprint_from: FootprintSource::Top,
        z_step: 10.0,
    });
    let expanded = expand(&settings, &geo).unwrap();

    // Left tile: 0 + 20 > 10 - 0, so it has no slices and is dropped.
    assert_eq!(expanded.positions.len(), 1);
    let right = &expanded.positions[0];
    assert_eq!(right.position, Some((750.0, 250.0)));
    let slices: Vec<f64> = right.slices.iter().flatten().copied().collect();
    assert_eq!(slices.first(), Some(&20.0));
    assert_eq!(slices.last(), Some(&100.0));
    assert_eq!(slices.len(), 9);
    assert!(expanded.events().iter().all(|e| e.position_index == 0));
}

#[test]
fn fixed_distance_brackets_surface() {
    let geo = provider();
    let surface = rectangle(&geo, "coverslip", 50.0, 50.0);
    let settings = AcquisitionSettings::new("fixed").with_space(SpaceMode::FixedDistanceFromSurface {
        surface,
        distance_above: 2.0,
        distance_below: 4.0,
        z_step: 2.0,
    });
    let expanded = expand(&settings, &geo).unwrap();
    assert_eq!(expanded.positions.len(), 2);
    for plan in &expanded.positions {
        assert_eq!(plan.slices, vec![Some(46.0), Some(48.0), Some(50.0), Some(52.0)]);
    }
}

#[test]
fn deleted_surface_is_a_configuration_error() {
    let geo = provider();
    let top = rectangle(&geo, "top", 10.0, 10.0);
    let bottom = rectangle(&geo, "bottom", 0.0, 0.0);
    geo.delete_surface(bottom).unwrap();

    let settings = AcquisitionSettings::new("stale").with_space(SpaceMode::VolumeBetweenSurfaces {
        top,
        bottom,
        distance_above_top: 0.0,
        distance_below_bottom: 0.0,
        footprint_from: FootprintSource::Top,
        z_step: 1.0,
    });
    let err = expand(&settings, &geo).unwrap_err();
    assert!(matches!(err, AcqError::UnresolvedSurface(_)));
    assert!(err.is_configuration());
}

#[test]
fn non_positive_step_rejected() {
    let geo = provider();
    let region = geo.add_region(Region::new("one", Point2::new(0.0, 0.0), 1, 1));
    let settings = AcquisitionSettings::new("flat").with_space(SpaceMode::SimpleZStack {
        footprint: Footprint::Region(region),
        z_start: 0.0,
        z_end: 1.0,
        z_step: 0.0,
    });
    assert!(matches!(expand(&settings, &geo), Err(AcqError::NonPositiveZStep(_))));
}

#[test]
fn interval_beyond_duration_range_rejected() {
    let geo = provider();
    let settings = AcquisitionSettings::new("forever").with_time(TimeSpec::points(2, 1.0e20, TimeUnit::Seconds));
    assert!(matches!(expand(&settings, &geo), Err(AcqError::Configuration(_))));
}

#[test]
fn surface_without_points_has_no_footprint() {
    let geo = provider();
    let empty = geo.add_surface("empty");
    let settings = AcquisitionSettings::new("nothing").with_space(SpaceMode::FixedDistanceFromSurface {
        surface: empty,
        distance_above: 1.0,
        distance_below: 1.0,
        z_step: 1.0,
    });
    assert!(expand(&settings, &geo).unwrap_err().is_configuration());
}
