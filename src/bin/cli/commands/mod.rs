pub mod capture;
pub mod review;
pub mod subjects;
