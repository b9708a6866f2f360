pub mod permission_hardener;
