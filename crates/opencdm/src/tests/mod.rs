mod adapter_tests;
