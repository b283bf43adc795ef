mod common;

use common::{square_scene, Pose};
use image::imageops;
use marker_track::codes::{decode_square, DecodeError, SquareParams, MAX_SQUARE_ID};
use marker_track::core::GrayImageView;
use nalgebra::Point2;

const SIDE: u32 = 160;

fn tilted() -> Pose {
    Pose {
        center: Point2::new(80.0, 80.0),
        side: 100.0,
        angle: 0.3,
    }
}

#[test]
fn tilted_codes_decode_from_any_starting_corner() {
    let pose = tilted();
    let corners = pose.corners();
    for id in 0..=MAX_SQUARE_ID {
        let img = square_scene(SIDE, SIDE, id, &pose);
        let view = GrayImageView::from(&img);
        for shift in 0..4 {
            let quad: [Point2<f32>; 4] = std::array::from_fn(|i| corners[(i + shift) % 4]);
            let d = decode_square(&view, &quad, false, &SquareParams::default())
                .unwrap_or_else(|e| panic!("id {id}, shift {shift}: {e}"));
            assert_eq!(d.id, id);
            assert_eq!(d.rotation, (4 - shift) % 4, "id {id}");
            assert_eq!(d.quad[0], corners[0]);
        }
    }
}

#[test]
fn mirrored_views_decode_with_the_flip_flag() {
    let pose = tilted();
    let c = pose.corners();
    let mirror = |p: Point2<f32>| Point2::new(SIDE as f32 - 1.0 - p.x, p.y);
    // mirroring reverses the winding, so walk the corners backwards
    let quad = [mirror(c[1]), mirror(c[0]), mirror(c[3]), mirror(c[2])];
    for id in 0..=MAX_SQUARE_ID {
        let img = imageops::flip_horizontal(&square_scene(SIDE, SIDE, id, &pose));
        let d = decode_square(&GrayImageView::from(&img), &quad, true, &SquareParams::default())
            .unwrap_or_else(|e| panic!("id {id}: {e}"));
        assert_eq!(d.id, id);
    }
}

#[test]
fn quads_off_the_marker_are_rejected() {
    let pose = tilted();
    let img = square_scene(SIDE, SIDE, 9, &pose);
    let view = GrayImageView::from(&img);

    let shifted = pose.corners().map(|p| p + nalgebra::Vector2::new(25.0, 0.0));
    assert!(decode_square(&view, &shifted, false, &SquareParams::default()).is_err());

    let outside = pose.corners().map(|p| p + nalgebra::Vector2::new(200.0, 0.0));
    assert_eq!(
        decode_square(&view, &outside, false, &SquareParams::default()),
        Err(DecodeError::SampleOutsideImage)
    );
}
