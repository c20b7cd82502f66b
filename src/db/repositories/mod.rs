mod timeseries;
