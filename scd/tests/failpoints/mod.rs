mod apply_test;
