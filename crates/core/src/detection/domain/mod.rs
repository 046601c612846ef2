pub mod region_detector;
