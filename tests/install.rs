//! The install hook seeds the write-once descriptor slot before first use.
//! Kept in its own test binary so nothing else races the global.

use nn_platform::{install, maximum_thread_count, platform, Platform};

#[test]
fn installed_descriptor_wins_over_detection() {
    let mut custom = Platform::baseline();
    custom.maximum_thread_count = 3;

    install(custom).expect("first install must succeed");
    assert_eq!(platform().maximum_thread_count(), 3);
    assert_eq!(maximum_thread_count(), 3);

    // The slot is write-once.
    assert!(install(Platform::baseline()).is_err());
}
